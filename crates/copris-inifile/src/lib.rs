//! copris-inifile — chargement des deux jeux de règles
//!
//! COPRIS lit deux fichiers INI :
//! - le **fichier d'encodage** : `caractère = octets`, un caractère UTF-8
//!   par nom (échappable avec `\`, `\e` tenant lieu de signe égal)
//! - le **fichier de fonctionnalités** : `F_*`/`S_*` connues ou macros
//!   `C_*` nouvelles, valeurs mêlant nombres et références
//!
//! Syntaxe commune : `nom = valeur`, commentaires `;`/`#` en début de
//! ligne, sections `[...]` acceptées mais ignorées, blancs rognés autour
//! du premier `=`. Toute faute est rapportée avec le fichier et la ligne.
//!
//! Grammaire d'une valeur :
//! ```text
//! valeur    := '@' | element (' ' element)*
//! element   := nombre | reference
//! nombre    := '0x' HEX+ | '0' OCT+ | DEC+          (un octet, 0..=255)
//! reference := ('C_' | 'F_') IDENT                  (fonctionnalités seulement)
//! ```

#![deny(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use copris_core::count_codepoints;
use copris_features::{
    parse_number_string, parse_values_with_commands, validate_command_pairs, CommandTable,
    FeatureError, ValueError, EMPTY_SENTINEL, MAX_ELEMENT_LENGTH, RESERVED_COMMANDS,
};

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Alias résultat des chargements.
pub type IniResult<T> = Result<T, IniError>;

/// Erreur d'un chargement de fichier INI.
#[derive(Debug, Error)]
pub enum IniError {
    /// Ouverture ou lecture impossible.
    #[error("impossible de lire '{}' : {source}", path.display())]
    Io {
        /// Fichier concerné.
        path: PathBuf,
        /// Erreur système sous-jacente.
        source: std::io::Error,
    },

    /// Entrée fautive, localisée dans le fichier.
    #[error("'{}', ligne {line} : {reason}", path.display())]
    Entry {
        /// Fichier concerné.
        path: PathBuf,
        /// Numéro de ligne (à partir de 1).
        line: usize,
        /// Nature de la faute.
        reason: EntryError,
    },

    /// Validation d'ensemble après lecture complète.
    #[error("'{}' : {source}", path.display())]
    Validation {
        /// Fichier concerné.
        path: PathBuf,
        /// Paire orpheline ou élément trop long.
        source: FeatureError,
    },
}

/// Fautes possibles d'une entrée `nom = valeur`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    /// Ligne sans `=`, ou section mal fermée.
    #[error("syntaxe non reconnue ; attendu 'nom = valeur', commentaire ou [section]")]
    Syntax,

    /// Nom ou valeur absents.
    #[error("entrée sans nom ou sans valeur ; pour une valeur volontairement vide, mettez '@'")]
    MissingNameOrValue,

    /// Signe égal non échappé dans un nom.
    #[error("signe égal détecté dans un nom ; remplacez-le par '\\e'")]
    UnescapedEquals,

    /// Nom d'encodage à plusieurs caractères.
    #[error("le nom '{0}' compte plus d'un caractère")]
    AmbiguousName(String),

    /// Nom réservé à de futures directives.
    #[error("le nom '{0}' est réservé et ne peut pas être employé")]
    ReservedName(String),

    /// Nom ni connu ni préfixé `C_`.
    #[error("nom '{0}' inconnu ; une commande personnalisée se préfixe 'C_'")]
    UnknownName(String),

    /// Valeur rejetée par le parseur.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// Nom ou valeur au-delà de la taille admise par la table.
    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/* ─────────────────────────── Balayage INI ─────────────────────────── */

/// Entrée brute produite par le balayage : nom et valeur rognés.
struct RawEntry<'a> {
    name: &'a str,
    value: &'a str,
}

/// Balaye `contents` ligne à ligne et invoque `handler` pour chaque
/// entrée `nom = valeur`.
fn scan_ini<F>(path: &Path, contents: &str, mut handler: F) -> IniResult<()>
where
    F: FnMut(RawEntry<'_>) -> Result<(), EntryError>,
{
    for (index, raw_line) in contents.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw_line.trim();

        if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('#') {
            continue;
        }

        // Sections acceptées mais ignorées
        if trimmed.starts_with('[') {
            if trimmed.ends_with(']') {
                continue;
            }
            return Err(IniError::Entry {
                path: path.to_owned(),
                line,
                reason: EntryError::Syntax,
            });
        }

        let Some((left, right)) = trimmed.split_once('=') else {
            return Err(IniError::Entry {
                path: path.to_owned(),
                line,
                reason: EntryError::Syntax,
            });
        };

        let entry = RawEntry { name: left.trim(), value: right.trim() };
        handler(entry).map_err(|reason| IniError::Entry { path: path.to_owned(), line, reason })?;
    }

    Ok(())
}

fn read_file(path: &Path) -> IniResult<String> {
    fs::read_to_string(path).map_err(|source| IniError::Io { path: path.to_owned(), source })
}

/* ─────────────────────────── Fichier d'encodage ─────────────────────────── */

/// Déséchappe le nom d'une définition d'encodage vers le caractère visé.
///
/// Un nom nu doit compter exactement un caractère ; un nom `\x` donne le
/// caractère `x`, `\e` (ou `\E`) donnant le signe égal que l'INI ne peut
/// pas porter tel quel.
fn unescape_encoding_name(name: &str) -> Result<String, EntryError> {
    // Un signe égal nu coupe l'entrée au mauvais endroit : le nom restant
    // est un backslash isolé.
    if name == "\\" {
        return Err(EntryError::UnescapedEquals);
    }

    let codepoints = count_codepoints(name.as_bytes(), 2);
    if codepoints > 1 {
        if !name.starts_with('\\') || codepoints > 2 {
            return Err(EntryError::AmbiguousName(name.to_owned()));
        }

        let escaped = &name[1..];
        if escaped.eq_ignore_ascii_case("e") {
            return Ok("=".to_owned());
        }
        return Ok(escaped.to_owned());
    }

    Ok(name.to_owned())
}

/// Charge un fichier d'encodage dans `table` et retourne le nombre de
/// définitions qu'elle contient.
///
/// Chaque entrée associe un caractère à la suite d'octets qui le remplace ;
/// `@` seul associe le caractère à rien (il disparaît du texte). Les
/// doublons écrasent silencieusement la définition précédente.
///
/// # Errors
/// [`IniError::Io`] si le fichier est illisible, [`IniError::Entry`] à la
/// première définition fautive.
pub fn load_encoding_file(path: &Path, table: &mut CommandTable) -> IniResult<usize> {
    debug!("Lecture du fichier d'encodage '{}' :", path.display());
    let contents = read_file(path)?;

    scan_ini(path, &contents, |entry| {
        if entry.name.is_empty() || entry.value.is_empty() {
            return Err(EntryError::MissingNameOrValue);
        }
        if entry.value.len() > MAX_ELEMENT_LENGTH {
            return Err(FeatureError::ValueTooLong(entry.name.to_owned(), entry.value.len()).into());
        }

        let name = unescape_encoding_name(entry.name)?;

        let parsed = if entry.value == "@" {
            Vec::new()
        } else {
            parse_number_string(entry.value, MAX_ELEMENT_LENGTH)?
        };

        let overwritten = table.set(&name, parsed.clone())?;

        if log::log_enabled!(log::Level::Debug) {
            let rendered: Vec<String> = parsed.iter().map(|b| format!("0x{b:X}")).collect();
            debug!(
                " {} => {}{}",
                name,
                if rendered.is_empty() { "(vide)".to_owned() } else { rendered.join(" ") },
                if overwritten { " (écrase l'ancienne valeur)" } else { "" }
            );
        }

        Ok(())
    })?;

    let count = table.len();
    info!("{count} définition(s) chargée(s) depuis '{}'.", path.display());
    if count == 0 {
        warn!("Votre fichier d'encodage semble vide.");
    }

    Ok(count)
}

/* ─────────────────────────── Fichier de fonctionnalités ─────────────────────────── */

/// Charge un fichier de fonctionnalités dans `table` — une table issue de
/// [`CommandTable::with_predefined`] — et retourne le nombre de commandes
/// non vides qui en résultent.
///
/// Une entrée remplit une commande connue (`F_*`, `S_*`) ou déclare une
/// macro `C_*` nouvelle ; les valeurs passent par le parseur avec
/// résolution des références contre la table en cours de remplissage,
/// donc sans référence avant définition. Après lecture, les paires
/// `_ON`/`_OFF` sont validées et la sentinelle `@` est normalisée.
///
/// # Errors
/// [`IniError::Io`], [`IniError::Entry`] sur une entrée fautive,
/// [`IniError::Validation`] pour une paire orpheline.
pub fn load_feature_file(path: &Path, table: &mut CommandTable) -> IniResult<usize> {
    debug!("Lecture du fichier de fonctionnalités '{}' :", path.display());
    let contents = read_file(path)?;

    scan_ini(path, &contents, |entry| {
        if entry.name.is_empty() || entry.value.is_empty() {
            return Err(EntryError::MissingNameOrValue);
        }
        if entry.name.len() > MAX_ELEMENT_LENGTH {
            return Err(FeatureError::NameTooLong(entry.name.to_owned(), entry.name.len()).into());
        }
        if entry.value.len() > MAX_ELEMENT_LENGTH {
            return Err(FeatureError::ValueTooLong(entry.name.to_owned(), entry.value.len()).into());
        }

        if RESERVED_COMMANDS.iter().any(|r| entry.name.eq_ignore_ascii_case(r)) {
            return Err(EntryError::ReservedName(entry.name.to_owned()));
        }

        if !table.contains(entry.name) && !entry.name.starts_with("C_") {
            return Err(EntryError::UnknownName(entry.name.to_owned()));
        }

        let parsed = if entry.value == "@" {
            vec![EMPTY_SENTINEL]
        } else {
            parse_values_with_commands(entry.value, MAX_ELEMENT_LENGTH, table)?
        };

        let overwritten = table.set(entry.name, parsed.clone())?;

        if log::log_enabled!(log::Level::Debug) {
            let rendered: Vec<String> = parsed.iter().map(|b| format!("0x{b:X}")).collect();
            debug!(
                " {} = {} => {} ({}){}",
                entry.name,
                entry.value,
                rendered.join(" "),
                parsed.len(),
                if overwritten { " (écrase l'ancienne valeur)" } else { "" }
            );
        }

        Ok(())
    })?;

    let count = table.defined_count();
    info!("{count} commande(s) chargée(s) depuis '{}'.", path.display());

    if count == 0 {
        warn!("Votre fichier de fonctionnalités semble vide.");
    } else {
        validate_command_pairs(table)
            .map_err(|source| IniError::Validation { path: path.to_owned(), source })?;
    }

    Ok(count)
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    fn ini_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn encoding_basic_definitions() {
        let file = ini_file("č = 0x63\nž = 0x7A\nš = 0x73\n");
        let mut table = CommandTable::new();

        let count = load_encoding_file(file.path(), &mut table).unwrap();
        assert_eq!(count, 3);
        assert_eq!(table.get("č"), Some(&b"c"[..]));
        assert_eq!(table.get("ž"), Some(&b"z"[..]));
        assert_eq!(table.get("š"), Some(&b"s"[..]));
    }

    #[test]
    fn encoding_comments_and_sections_ignored() {
        let file = ini_file("; commentaire\n# autre\n[Slovène]\nč = 99\n");
        let mut table = CommandTable::new();

        assert_eq!(load_encoding_file(file.path(), &mut table).unwrap(), 1);
        assert_eq!(table.get("č"), Some(&b"c"[..]));
    }

    #[test]
    fn encoding_escapes() {
        let file = ini_file("\\e = 0x3D 0x3D\n\\# = 0x23\n");
        let mut table = CommandTable::new();

        load_encoding_file(file.path(), &mut table).unwrap();
        assert_eq!(table.get("="), Some(&b"=="[..]));
        assert_eq!(table.get("#"), Some(&b"#"[..]));
    }

    #[test]
    fn encoding_unescaped_equals_is_diagnosed() {
        let file = ini_file("\\= = 0x3D\n");
        let mut table = CommandTable::new();

        let err = load_encoding_file(file.path(), &mut table).unwrap_err();
        assert!(matches!(
            err,
            IniError::Entry { line: 1, reason: EntryError::UnescapedEquals, .. }
        ));
    }

    #[test]
    fn encoding_multichar_name_rejected() {
        let file = ini_file("ab = 0x63\n");
        let mut table = CommandTable::new();

        let err = load_encoding_file(file.path(), &mut table).unwrap_err();
        assert!(matches!(
            err,
            IniError::Entry { reason: EntryError::AmbiguousName(ref n), .. } if n == "ab"
        ));
    }

    #[test]
    fn encoding_at_maps_to_nothing() {
        let file = ini_file("œ = @\n");
        let mut table = CommandTable::new();

        load_encoding_file(file.path(), &mut table).unwrap();
        assert_eq!(table.get("œ"), Some(&[][..]));
    }

    #[test]
    fn encoding_duplicate_overwrites() {
        let file = ini_file("é = 0x65\né = 0x45\n");
        let mut table = CommandTable::new();

        assert_eq!(load_encoding_file(file.path(), &mut table).unwrap(), 1);
        assert_eq!(table.get("é"), Some(&b"E"[..]));
    }

    #[test]
    fn encoding_missing_file() {
        let mut table = CommandTable::new();
        let err = load_encoding_file(Path::new("/nonexistent/copris.ini"), &mut table).unwrap_err();
        assert!(matches!(err, IniError::Io { .. }));
    }

    #[test]
    fn feature_known_and_custom_commands() {
        let file = ini_file(
            "C_RESET = 0x1B 0x40\n\
             F_BOLD_ON = 0x1B 0x45\n\
             F_BOLD_OFF = 0x1B 0x46\n\
             S_AT_STARTUP = C_RESET\n",
        );
        let mut table = CommandTable::with_predefined();

        let count = load_feature_file(file.path(), &mut table).unwrap();
        assert_eq!(count, 4);
        assert_eq!(table.get("F_BOLD_ON"), Some(&[0x1B, 0x45][..]));
        assert_eq!(table.get("S_AT_STARTUP"), Some(&[0x1B, 0x40][..]));
    }

    #[test]
    fn feature_macro_may_reference_formatting_commands() {
        let file = ini_file(
            "F_BOLD_ON = 0x1B 0x45\n\
             F_BOLD_OFF = 0x1B 0x46\n\
             C_TITRE = F_BOLD_ON 0x2A F_BOLD_OFF\n",
        );
        let mut table = CommandTable::with_predefined();

        load_feature_file(file.path(), &mut table).unwrap();
        assert_eq!(table.get("C_TITRE"), Some(&[0x1B, 0x45, 0x2A, 0x1B, 0x46][..]));
    }

    #[test]
    fn feature_missing_pair_fails() {
        let file = ini_file("F_BOLD_ON = 0x1B 0x45\n");
        let mut table = CommandTable::with_predefined();

        let err = load_feature_file(file.path(), &mut table).unwrap_err();
        match err {
            IniError::Validation {
                source: FeatureError::MissingPair { command, pair }, ..
            } => {
                assert_eq!(command, "F_BOLD_ON");
                assert_eq!(pair, "F_BOLD_OFF");
            }
            other => panic!("erreur inattendue : {other}"),
        }
    }

    #[test]
    fn feature_pair_satisfied_by_sentinel() {
        let file = ini_file("F_BOLD_ON = 0x1B 0x45\nF_BOLD_OFF = @\n");
        let mut table = CommandTable::with_predefined();

        load_feature_file(file.path(), &mut table).unwrap();
        assert_eq!(table.get("F_BOLD_OFF"), Some(&[][..]));
    }

    #[test]
    fn feature_forward_reference_fails() {
        let file = ini_file("C_FOO = C_BAR\nC_BAR = 0x07\n");
        let mut table = CommandTable::with_predefined();

        let err = load_feature_file(file.path(), &mut table).unwrap_err();
        match err {
            IniError::Entry { line, reason: EntryError::Value(v), .. } => {
                assert_eq!(line, 1);
                assert_eq!(v, ValueError::UndefinedCommand("C_BAR".into()));
            }
            other => panic!("erreur inattendue : {other}"),
        }
    }

    #[test]
    fn feature_reserved_names_rejected() {
        let file = ini_file("C_NO_MARKDOWN = 0x00\n");
        let mut table = CommandTable::with_predefined();

        let err = load_feature_file(file.path(), &mut table).unwrap_err();
        assert!(matches!(
            err,
            IniError::Entry { reason: EntryError::ReservedName(_), .. }
        ));
    }

    #[test]
    fn feature_unknown_name_rejected() {
        let file = ini_file("X_MYSTERE = 0x00\n");
        let mut table = CommandTable::with_predefined();

        let err = load_feature_file(file.path(), &mut table).unwrap_err();
        assert!(matches!(
            err,
            IniError::Entry { reason: EntryError::UnknownName(ref n), .. } if n == "X_MYSTERE"
        ));
    }

    #[test]
    fn feature_dump_roundtrip() {
        let file = ini_file(&copris_features::dump_commands());
        let mut table = CommandTable::with_predefined();

        let count = load_feature_file(file.path(), &mut table).unwrap();
        assert_eq!(count, 0);

        let names: Vec<&str> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(names, copris_features::PREDEFINED_COMMANDS.to_vec());
        assert!(table.iter().all(|(_, v)| v.is_empty()));
    }

    #[test]
    fn feature_entry_without_value_fails() {
        let file = ini_file("F_BOLD_ON =\n");
        let mut table = CommandTable::with_predefined();

        let err = load_feature_file(file.path(), &mut table).unwrap_err();
        assert!(matches!(
            err,
            IniError::Entry { reason: EntryError::MissingNameOrValue, .. }
        ));
    }
}
