//! copris-features — commandes d'imprimante et parseur de valeurs
//!
//! Le cœur du crate est [`CommandTable`], une table nom → octets qui
//! conserve l'ordre d'insertion. Trois familles de noms s'y côtoient :
//! - `F_*_ON` / `F_*_OFF` : paires de mise en forme (gras, titres, …)
//! - `S_*` : commandes de session, émises autour du texte reçu
//! - `C_*` : macros définies par l'utilisateur, résolues à la volée
//!
//! S'y ajoutent :
//! - le parseur de valeurs (`0x1B`, `033`, `27`, références `C_`/`F_`)
//! - la validation des paires `_ON`/`_OFF` avec la sentinelle `@`
//! - l'application des commandes de session sur un tampon
//! - le gabarit `dump_commands()` prêt à remplir
//!
//! Les fichiers INI eux-mêmes sont lus par `copris-inifile` ; ce crate ne
//! voit que des noms et des valeurs déjà découpés.

#![deny(missing_docs)]

use indexmap::IndexMap;
use log::{debug, info};
use thiserror::Error;

/* ─────────────────────────── Constantes ─────────────────────────── */

/// Taille maximale d'un nom ou d'une valeur de la table, en octets.
pub const MAX_ELEMENT_LENGTH: usize = 47;

/// Octet sentinelle : une valeur réduite à `@` signifie « définie, vide ».
pub const EMPTY_SENTINEL: u8 = b'@';

/// Noms réservés à de futures directives, interdits aux utilisateurs.
pub const RESERVED_COMMANDS: [&str; 2] = ["C_NO_MARKDOWN", "C_NO_COMMANDS"];

/// Commandes connues, pré-insérées vides dans toute table de
/// fonctionnalités. L'ordre est celui du gabarit `dump_commands()`.
pub const PREDEFINED_COMMANDS: [&str; 24] = [
    // Mise en forme ; les deux moitiés d'une paire doivent être définies.
    "F_BOLD_ON",
    "F_BOLD_OFF",
    "F_ITALIC_ON",
    "F_ITALIC_OFF",
    "F_H1_ON",
    "F_H1_OFF",
    "F_H2_ON",
    "F_H2_OFF",
    "F_H3_ON",
    "F_H3_OFF",
    "F_H4_ON",
    "F_H4_OFF",
    "F_BLOCKQUOTE_ON",
    "F_BLOCKQUOTE_OFF",
    "F_INLINE_CODE_ON",
    "F_INLINE_CODE_OFF",
    "F_CODE_BLOCK_ON",
    "F_CODE_BLOCK_OFF",
    "F_LINK_ON",
    "F_LINK_OFF",
    // Session ; autour du texte imprimé, au démarrage et à l'arrêt.
    "S_BEFORE_TEXT",
    "S_AFTER_TEXT",
    "S_AT_STARTUP",
    "S_AT_SHUTDOWN",
];

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Alias résultat des opérations sur la table.
pub type FeatureResult<T> = Result<T, FeatureError>;

/// Erreurs de construction ou de validation de la table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    /// Nom au-delà de [`MAX_ELEMENT_LENGTH`].
    #[error("nom '{0}' trop long ({1} octets pour {MAX_ELEMENT_LENGTH} au plus)")]
    NameTooLong(String, usize),

    /// Valeur au-delà de [`MAX_ELEMENT_LENGTH`].
    #[error("valeur de '{0}' trop longue ({1} octets pour {MAX_ELEMENT_LENGTH} au plus)")]
    ValueTooLong(String, usize),

    /// Une moitié de paire `_ON`/`_OFF` manque à l'appel.
    #[error("la commande '{command}' n'a pas sa paire '{pair}' ; définissez-la, au besoin vide avec '@'")]
    MissingPair {
        /// La commande définie par l'utilisateur.
        command: String,
        /// La moitié absente.
        pair: String,
    },
}

/// Erreurs du parseur de valeurs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// Nombre hors de `0..=255`.
    #[error("valeur '{0}' hors bornes (un octet, 0..=255)")]
    OutOfRange(String),

    /// Caractères inattendus dans un nombre.
    #[error("caractères non reconnus dans '{0}' ; attendu : nombres décimaux, hexadécimaux ou octaux séparés par des espaces, ou noms préfixés 'C_'/'F_'")]
    Unrecognised(String),

    /// Suite d'octets plus longue que la capacité du demandeur.
    #[error("valeur trop longue ({got} octets pour {cap} au plus)")]
    Overlong {
        /// Octets produits.
        got: usize,
        /// Capacité maximale.
        cap: usize,
    },

    /// Référence à une commande inconnue ou pas encore remplie.
    #[error("la commande '{0}' n'existe pas (encore) ; une macro 'C_' doit être définie avant son premier emploi")]
    UndefinedCommand(String),
}

/* ─────────────────────────── Table de commandes ─────────────────────────── */

/// Table nom → octets, ordre d'insertion préservé.
///
/// Les recherches passent par le hachage d'`IndexMap`, l'itération suit
/// strictement l'ordre des insertions : les dumps sont reproductibles.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: IndexMap<String, Vec<u8>>,
}

impl CommandTable {
    /// Table vide.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pré-remplie de toutes les commandes connues, valeurs vides.
    #[must_use]
    pub fn with_predefined() -> Self {
        let mut table = Self::new();
        for name in PREDEFINED_COMMANDS {
            table.entries.insert(name.to_owned(), Vec::new());
        }

        debug!("{} commandes d'imprimante initialisées à vide.", table.len());
        table
    }

    /// Valeur associée à `name`, si présente.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Vrai si `name` existe dans la table (même avec une valeur vide).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Insère ou remplace `name`. Retourne `true` si une valeur non vide a
    /// été écrasée.
    ///
    /// # Errors
    /// Si le nom ou la valeur dépasse [`MAX_ELEMENT_LENGTH`].
    pub fn set(&mut self, name: &str, value: Vec<u8>) -> FeatureResult<bool> {
        if name.len() > MAX_ELEMENT_LENGTH {
            return Err(FeatureError::NameTooLong(name.to_owned(), name.len()));
        }
        if value.len() > MAX_ELEMENT_LENGTH {
            return Err(FeatureError::ValueTooLong(name.to_owned(), value.len()));
        }

        let overwritten =
            self.entries.insert(name.to_owned(), value).is_some_and(|old| !old.is_empty());
        Ok(overwritten)
    }

    /// Itère en ordre d'insertion.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Nombre d'entrées, valeurs vides comprises.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Vrai si la table ne contient aucune entrée.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nombre d'entrées à valeur non vide.
    #[must_use]
    pub fn defined_count(&self) -> usize {
        self.entries.values().filter(|v| !v.is_empty()).count()
    }

    /// Vide la table.
    pub fn clear(&mut self) {
        let count = self.entries.len();
        self.entries.clear();
        debug!("Table déchargée ({count} entrée(s)).");
    }
}

/* ─────────────────────────── Parseur de valeurs ─────────────────────────── */

/// Parse un seul nombre : `0x`/`0X` → base 16, `0` en tête → base 8,
/// sinon base 10. Le résultat doit tenir sur un octet.
fn parse_numeric_token(token: &str) -> Result<u8, ValueError> {
    let (digits, radix) = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        (hex, 16)
    } else if token.len() > 1 && token.starts_with('0') {
        (&token[1..], 8)
    } else {
        (token, 10)
    };

    let number = u32::from_str_radix(digits, radix).map_err(|e| {
        use std::num::IntErrorKind;
        match e.kind() {
            IntErrorKind::PosOverflow => ValueError::OutOfRange(token.to_owned()),
            _ => ValueError::Unrecognised(token.to_owned()),
        }
    })?;

    u8::try_from(number).map_err(|_| ValueError::OutOfRange(token.to_owned()))
}

/// Parse une suite de nombres séparés par des blancs en octets bruts.
///
/// # Errors
/// [`ValueError::Unrecognised`], [`ValueError::OutOfRange`] sur un token
/// fautif, [`ValueError::Overlong`] si plus de `cap` octets sont produits.
pub fn parse_number_string(value: &str, cap: usize) -> Result<Vec<u8>, ValueError> {
    let mut parsed = Vec::new();

    for token in value.split_whitespace() {
        if parsed.len() == cap {
            return Err(ValueError::Overlong { got: parsed.len() + 1, cap });
        }
        parsed.push(parse_numeric_token(token)?);
    }

    Ok(parsed)
}

/// Parse une valeur mêlant nombres et références `C_`/`F_`, résolues
/// contre `table`.
///
/// La règle est stricte : une référence doit désigner une commande déjà
/// remplie — pas de référence avant définition.
///
/// # Errors
/// Les erreurs de [`parse_number_string`], plus
/// [`ValueError::UndefinedCommand`] pour une référence inconnue ou vide.
pub fn parse_values_with_commands(
    value: &str,
    cap: usize,
    table: &CommandTable,
) -> Result<Vec<u8>, ValueError> {
    let mut parsed = Vec::new();

    for token in value.split_whitespace() {
        if token.starts_with("C_") || token.starts_with("F_") {
            let resolved = table
                .get(token)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ValueError::UndefinedCommand(token.to_owned()))?;

            if parsed.len() + resolved.len() > cap {
                return Err(ValueError::Overlong { got: parsed.len() + resolved.len(), cap });
            }
            parsed.extend_from_slice(resolved);
        } else {
            if parsed.len() == cap {
                return Err(ValueError::Overlong { got: parsed.len() + 1, cap });
            }
            parsed.push(parse_numeric_token(token)?);
        }
    }

    Ok(parsed)
}

/* ─────────────────────────── Validation des paires ─────────────────────────── */

/// Moitié opposée d'un nom `F_*_ON`/`F_*_OFF`, `None` pour les autres.
fn pair_of(name: &str) -> Option<String> {
    if !name.starts_with("F_") {
        return None;
    }

    name.strip_suffix("_ON")
        .map(|stem| format!("{stem}_OFF"))
        .or_else(|| name.strip_suffix("_OFF").map(|stem| format!("{stem}_ON")))
}

/// Vérifie qu'aucune paire `_ON`/`_OFF` n'est orpheline, puis normalise la
/// sentinelle `@` en valeur vide.
///
/// Une commande définie (valeur non vide, `@` compris) exige sa moitié
/// définie elle aussi ; `@` permet de déclarer une moitié volontairement
/// vide.
///
/// # Errors
/// [`FeatureError::MissingPair`] à la première paire incomplète.
pub fn validate_command_pairs(table: &mut CommandTable) -> FeatureResult<()> {
    for name in PREDEFINED_COMMANDS {
        let Some(pair) = pair_of(name) else { continue };

        let defined = table.get(name).is_some_and(|v| !v.is_empty());
        if !defined {
            continue;
        }

        let pair_defined = table.get(&pair).is_some_and(|v| !v.is_empty());
        if !pair_defined {
            return Err(FeatureError::MissingPair { command: name.to_owned(), pair });
        }
    }

    // '@' a rempli son office : les moitiés « définies vides » redeviennent
    // vides avant tout emploi de la table.
    let sentinels: Vec<String> = table
        .iter()
        .filter(|(_, v)| *v == [EMPTY_SENTINEL])
        .map(|(k, _)| k.to_owned())
        .collect();

    for name in sentinels {
        table.entries.insert(name, Vec::new());
    }

    debug!("Aucune paire de mise en forme orpheline.");
    Ok(())
}

/* ─────────────────────────── Commandes de session ─────────────────────────── */

/// Moment d'émission d'une commande de session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    /// Une fois, avant le tout premier flux.
    Startup,
    /// Autour de chaque texte imprimé.
    Print,
    /// Une fois, après le dernier flux.
    Shutdown,
}

/// Ajoute les commandes de session au tampon et retourne le nombre
/// d'octets insérés.
///
/// `Print` encadre le texte (`S_BEFORE_TEXT` devant, `S_AFTER_TEXT`
/// derrière) ; `Startup` et `Shutdown` ajoutent leur commande seule.
pub fn apply_session_commands(text: &mut Vec<u8>, table: &CommandTable, state: Session) -> usize {
    let append_name = match state {
        Session::Print => "S_AFTER_TEXT",
        Session::Startup => "S_AT_STARTUP",
        Session::Shutdown => "S_AT_SHUTDOWN",
    };

    let mut added = 0;

    if let Some(value) = table.get(append_name).filter(|v| !v.is_empty()) {
        info!("Ajout de la commande de session {append_name}.");
        text.extend_from_slice(value);
        added += value.len();
    }

    if state != Session::Print {
        return added;
    }

    if let Some(value) = table.get("S_BEFORE_TEXT").filter(|v| !v.is_empty()) {
        info!("Ajout de la commande de session S_BEFORE_TEXT.");
        text.splice(0..0, value.iter().copied());
        added += value.len();
    }

    added
}

/* ─────────────────────────── Gabarit ─────────────────────────── */

/// Rend un fichier de fonctionnalités commenté, prêt à remplir.
///
/// Rechargé tel quel, le gabarit produit une table contenant exactement
/// les commandes connues, toutes vides.
#[must_use]
pub fn dump_commands() -> String {
    let mut out = String::new();

    out.push_str(concat!(
        "# Liste des commandes d'imprimante. Générée par COPRIS ",
        env!("CARGO_PKG_VERSION"),
        "\n\n"
    ));
    out.push_str(
        "# Définissez ici vos commandes personnalisées, utilisables dans les\n\
         # catégories ci-dessous. Exemples :\n\
         #  C_UNDERLINE_ON = 0x1B 0x2D 0x31\n\
         #  C_RESET_PRINTER = C_MARGIN_3CM C_SIZE_10CPI  ; définies plus haut\n\n",
    );

    let mut prefix = '\0';
    for name in PREDEFINED_COMMANDS {
        let first = name.chars().next().unwrap_or('\0');
        if first != prefix {
            prefix = first;
            match prefix {
                'F' => out.push_str(
                    "# Commandes de mise en forme ; les deux moitiés d'une paire\n\
                     # doivent être définies.\n",
                ),
                'S' => out.push_str(
                    "\n# Commandes de session ; émises autour du texte reçu, au\n\
                     # démarrage de COPRIS et avant son arrêt.\n",
                ),
                _ => {}
            }
        }

        // Un espace de plus pour aligner les signes égal des moitiés courtes
        let aligned = name.ends_with("_ON") || name == "S_AFTER_TEXT" || name == "S_AT_STARTUP";
        if aligned {
            out.push_str(&format!("; {name}  = \n"));
        } else {
            out.push_str(&format!("; {name} = \n"));
        }
    }

    out.push('\n');
    out
}

/* ─────────────────────────── Tests ─────────────────────────── */
