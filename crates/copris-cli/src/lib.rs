//! copris-cli — bibliothèque interne du binaire `copris`
//!
//! But : une API propre et testable pour le CLI, sans mélanger la
//! logique de traitement et le parsing d'arguments (laissé à `main.rs`).
//!
//! La chaîne de conversion, flux par flux :
//!
//! ```text
//! [lecture] → [modeline] → [recodage] → [filtre ASCII] → [markdown]
//!           → [variables] → [session] → [écriture]
//! ```
//!
//! Chaque étape mute le même tampon d'octets ; l'ordre est fixe, seules
//! la modeline et les options décident quelles étapes jouent.

#![deny(unused_must_use)]

use anyhow::{Context, Result};
use log::{error, info, warn};

use copris_convert::{apply_modeline, parse_modeline, parse_variables, recode_text, Modeline};
use copris_core::{filter_non_ascii, Attribs};
use copris_features::{apply_session_commands, CommandTable, Session};
use copris_inifile::{load_encoding_file, load_feature_file};
use copris_markdown::parse_markdown;
use copris_server::{handle_socket, listen, read_stdin, write_output, ServerError};

/* ─────────────────────────── Jeux de règles ─────────────────────────── */

/// Les deux tables chargées au démarrage.
#[derive(Debug, Default)]
pub struct RuleSets {
    /// Commandes d'imprimante, pré-remplies puis complétées par le
    /// fichier de fonctionnalités.
    pub features: CommandTable,
    /// Table d'encodage, `None` sans fichier d'encodage.
    pub encoding: Option<CommandTable>,
}

/// Charge les fichiers de règles désignés par `attrib`.
///
/// Hors mode silencieux, un fichier fautif est fatal ; en mode
/// silencieux la fonctionnalité concernée est simplement désactivée et
/// la chaîne continue sans elle.
///
/// # Errors
/// L'erreur du chargeur fautif, enrichie du contexte.
pub fn load_rule_sets(attrib: &Attribs, quiet: bool) -> Result<RuleSets> {
    let mut rules = RuleSets { features: CommandTable::with_predefined(), encoding: None };

    if let Some(path) = &attrib.feature_file {
        if let Err(e) = load_feature_file(path, &mut rules.features) {
            if !quiet {
                return Err(e).context("échec du chargement du fichier de fonctionnalités");
            }
            error!("{e}");
            error!("Poursuite sans fichier de fonctionnalités.");
            rules.features = CommandTable::with_predefined();
        }
    }

    if let Some(path) = &attrib.encoding_file {
        let mut encoding = CommandTable::new();
        match load_encoding_file(path, &mut encoding) {
            Ok(_) => rules.encoding = Some(encoding),
            Err(e) => {
                if !quiet {
                    return Err(e).context("échec du chargement du fichier d'encodage");
                }
                error!("{e}");
                error!("Poursuite sans fichier d'encodage.");
            }
        }
    }

    Ok(rules)
}

/* ─────────────────────────── Chaîne de conversion ─────────────────────────── */

/// Fait passer un texte reçu par toutes les étapes de conversion.
pub fn process_text(text: &mut Vec<u8>, rules: &RuleSets, attrib: &Attribs) {
    let modeline = parse_modeline(text);
    apply_modeline(text, modeline);

    let (commands_enabled, markdown_disabled) = match modeline {
        Modeline::Directives { enable_commands, disable_markdown } => {
            (enable_commands, disable_markdown)
        }
        _ => (false, false),
    };

    if let Some(encoding) = &rules.encoding {
        let raw_multibyte = recode_text(text, encoding);
        if raw_multibyte {
            warn!(
                "Des caractères multi-octets sans définition subsistent ; la sortie \
                 contiendra de l'UTF-8 brut."
            );
        }
    }

    if attrib.filter_non_ascii {
        filter_non_ascii(text);
    }

    if !markdown_disabled {
        parse_markdown(text, &rules.features);
    }

    if commands_enabled {
        parse_variables(text, &rules.features);
    }

    apply_session_commands(text, &rules.features, Session::Print);
}

/* ─────────────────────────── Boucle principale ─────────────────────────── */

/// Émet une commande de session seule (démarrage ou arrêt) vers la
/// destination.
fn write_session_command(rules: &RuleSets, attrib: &Attribs, state: Session) -> Result<()> {
    let mut text = Vec::new();
    apply_session_commands(&mut text, &rules.features, state);

    if !text.is_empty() {
        write_output(&text, attrib.destination.as_deref())
            .context("échec de l'écriture d'une commande de session")?;
    }

    Ok(())
}

/// Lance COPRIS : charge les règles, lit les flux, convertit, écrit.
///
/// Retourne normalement quand le dernier flux est servi — tout de suite
/// hors mode démon, jamais (sauf erreur) avec. Un stdin vide se solde
/// par un simple avertissement.
///
/// # Errors
/// Erreurs de chargement des règles, d'écoute réseau hors mode démon,
/// ou d'écriture vers la destination.
pub fn run(mut attrib: Attribs, quiet: bool) -> Result<()> {
    if attrib.daemon && attrib.port.is_none() {
        attrib.daemon = false;
        warn!("Le mode démon n'est pas disponible en lecture depuis stdin.");
    }

    let rules = load_rule_sets(&attrib, quiet)?;

    if attrib.daemon {
        info!("Mode démon activé.");
    }
    if attrib.limit > 0 {
        info!("Données entrantes limitées à {} octets.", attrib.limit);
    }
    match &attrib.destination {
        Some(path) => info!("Le flux de données sera envoyé vers {}.", path.display()),
        None => info!("Le flux de données sera envoyé vers stdout."),
    }

    write_session_command(&rules, &attrib, Session::Startup)?;

    let mut listener = match attrib.port {
        Some(port) => Some(listen(port).context("impossible d'ouvrir le socket d'écoute")?),
        None => None,
    };

    loop {
        let mut text = Vec::new();

        let read_result = if attrib.port.is_some() {
            handle_socket(&mut listener, &mut text, &attrib).map(|_| ())
        } else {
            read_stdin(&mut text).map(|_| ())
        };

        match read_result {
            Ok(()) => {
                process_text(&mut text, &rules, &attrib);
                write_output(&text, attrib.destination.as_deref())
                    .context("échec de l'écriture vers la destination")?;
            }
            Err(ServerError::NoInput) => {
                warn!("Aucun texte n'a été lu !");
                break;
            }
            Err(e) => {
                // Fatal pour le flux ; le démon, lui, repart
                if !attrib.daemon {
                    return Err(e).context("échec de la lecture du flux");
                }
                error!("{e}");
            }
        }

        if !attrib.daemon {
            break;
        }
    }

    write_session_command(&rules, &attrib, Session::Shutdown)?;

    if attrib.port.is_some() && !attrib.daemon {
        info!("Pas de mode démon, on s'arrête.");
    }

    Ok(())
}

/* ─────────────────────────── Tests ─────────────────────────── */
