//! copris-server — les entrées/sorties de COPRIS
//!
//! Trois portes donnent sur le monde :
//! - [`listen`] + [`handle_socket`] : le serveur TCP, une connexion à la
//!   fois, lectures par chunks et limite d'octets avec coupe sûre UTF-8
//! - [`read_stdin`] : l'alternative sans réseau, lecture binaire
//!   jusqu'à EOF
//! - [`write_output`] : la sortie vers un fichier, un périphérique ou
//!   stdout
//!
//! Le protocole est du TCP nu, sans trame : un flux = un texte. Le seul
//! message remontant vers le client est l'avis de dépassement de limite,
//! au format fixe `copris: <texte>\n`.

#![deny(missing_docs)]

use std::fs::OpenOptions;
use std::io::{self, IsTerminal, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;

use log::{debug, info, warn};
use thiserror::Error;

use copris_core::{terminate_incomplete, Attribs, Cutoff, Stats};

/* ─────────────────────────── Constantes ─────────────────────────── */

/// Taille d'un chunk de lecture, socket ou stdin.
pub const CHUNK_SIZE: usize = 128;

/// Avis envoyé au client quand la limite d'octets se déclenche.
pub const LIMIT_NOTICE: &str = "You have sent too much text. Terminating connection.";

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Alias résultat des entrées/sorties.
pub type ServerResult<T> = Result<T, ServerError>;

/// Erreur d'une opération d'entrée/sortie.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Échec d'une opération système, avec l'action en clair.
    #[error("échec de {action} : {source}")]
    Io {
        /// L'action qui a échoué.
        action: &'static str,
        /// Erreur système sous-jacente.
        source: io::Error,
    },

    /// stdin n'a fourni aucun octet.
    #[error("aucun texte n'a été lu")]
    NoInput,
}

fn io_err(action: &'static str) -> impl FnOnce(io::Error) -> ServerError {
    move |source| ServerError::Io { action, source }
}

/* ─────────────────────────── Serveur TCP ─────────────────────────── */

/// Crée le socket d'écoute sur `port`.
///
/// # Errors
/// [`ServerError::Io`] si la création ou la liaison échoue — sous Unix,
/// les ports < 1024 demandent des privilèges.
pub fn listen(port: u16) -> ServerResult<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .map_err(io_err("la liaison du socket à l'adresse (port < 1024 ?)"))?;

    debug!("Socket lié à l'adresse, port {port}.");
    info!("Nous voilà à l'écoute...");

    Ok(listener)
}

/// Accepte une connexion, lit le texte du client dans `text` et referme.
///
/// `text` doit arriver vide : la limite d'octets se mesure sur le tampon
/// entier. En mode non démon, le socket d'écoute est fermé sitôt la
/// connexion acceptée — pas de file d'attente pour un serveur à un coup.
///
/// # Errors
/// [`ServerError::Io`] sur un échec d'`accept` ou de lecture ; fatal
/// pour le flux, pas pour le processus en mode démon.
pub fn handle_socket(
    listener: &mut Option<TcpListener>,
    text: &mut Vec<u8>,
    attrib: &Attribs,
) -> ServerResult<Stats> {
    let Some(parent) = listener.as_ref() else {
        return Err(ServerError::Io {
            action: "l'attente de connexion",
            source: io::Error::new(io::ErrorKind::NotConnected, "socket d'écoute déjà fermé"),
        });
    };

    let (mut stream, peer) = parent.accept().map_err(io_err("l'acceptation de la connexion"))?;
    debug!("Connexion au socket acceptée.");

    // Une seule connexion hors mode démon
    if !attrib.daemon {
        *listener = None;
        debug!("Fermeture du socket d'écoute.");
    }

    info!("Connexion entrante de {peer}.");

    let mut stats = Stats::default();
    read_from_socket(&mut stream, text, &mut stats, attrib)?;

    info!(
        "Fin du flux, {} octet(s) reçus en {} chunk(s){}.",
        stats.sum,
        stats.chunks,
        if stats.size_limit_active {
            format!(
                ", {} octet(s) {}",
                stats.discarded,
                if attrib.cutoff == Cutoff::Truncate { "coupés" } else { "écartés" }
            )
        } else {
            String::new()
        }
    );
    info!("Connexion de {peer} refermée.");

    Ok(stats)
}

/// Envoie au client un message préfixé `copris: `, terminé par un saut
/// de ligne.
fn send_to_socket(stream: &mut TcpStream, message: &str) {
    let full_message = format!("copris: {message}\n");
    if let Err(e) = stream.write_all(full_message.as_bytes()) {
        warn!("Échec de l'envoi du message au client : {e}");
    }
}

fn read_from_socket(
    stream: &mut TcpStream,
    text: &mut Vec<u8>,
    stats: &mut Stats,
    attrib: &Attribs,
) -> ServerResult<()> {
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let length = stream.read(&mut buffer).map_err(io_err("la lecture du socket"))?;
        if length == 0 {
            break;
        }

        text.extend_from_slice(&buffer[..length]);
        stats.chunks += 1;
        stats.sum += length;

        // La limite se mesure sur le texte assemblé, pas par chunk
        if attrib.limit > 0 && stats.sum > attrib.limit {
            apply_byte_limit(stream, text, stats, attrib);
            break;
        }
    }

    Ok(())
}

fn apply_byte_limit(stream: &mut TcpStream, text: &mut Vec<u8>, stats: &mut Stats, attrib: &Attribs) {
    send_to_socket(stream, LIMIT_NOTICE);
    stats.size_limit_active = true;

    match attrib.cutoff {
        Cutoff::Discard => {
            stats.discarded = stats.sum;
            text.clear();

            warn!(
                "Le client a dépassé la limite d'envoi ({} o/{} o) ; texte écarté en \
                 entier, connexion refermée.",
                stats.sum, attrib.limit
            );
        }
        Cutoff::Truncate => {
            // Couper à la limite, puis retirer un éventuel codepoint
            // multi-octets scindé par la coupe
            text.truncate(attrib.limit);
            let terminated = terminate_incomplete(text);
            stats.discarded = stats.sum - text.len();

            warn!(
                "Le client a dépassé la limite d'envoi ({} o/{} o) ; texte coupé à la \
                 limite, connexion refermée.",
                stats.sum, attrib.limit
            );

            if terminated {
                debug!("Des octets multi-octets supplémentaires ont été retirés de la sortie.");
            }
        }
    }
}

/* ─────────────────────────── Lecture stdin ─────────────────────────── */

/// Lit l'entrée standard, octets bruts, jusqu'à EOF.
///
/// # Errors
/// [`ServerError::NoInput`] si EOF arrive sans un seul octet,
/// [`ServerError::Io`] sur une erreur de lecture.
pub fn read_stdin(text: &mut Vec<u8>) -> ServerResult<Stats> {
    info!("Tentative de lecture depuis stdin...");

    // Invoqué seul, hors d'un tube : l'utilisateur devra taper son texte
    // au clavier, autant le lui dire.
    if io::stdin().is_terminal() {
        warn!(
            "Vous êtes en saisie interactive (lecture de stdin). Pour terminer, \
             pressez Ctrl+D."
        );
    }

    let mut stats = Stats::default();
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut stdin = io::stdin().lock();

    loop {
        let length = stdin.read(&mut buffer).map_err(io_err("la lecture de stdin"))?;
        if length == 0 {
            break;
        }

        text.extend_from_slice(&buffer[..length]);
        stats.chunks += 1;
        stats.sum += length;
    }

    if stats.sum == 0 {
        return Err(ServerError::NoInput);
    }

    info!("{} octet(s) reçus en {} chunk(s) depuis stdin.", stats.sum, stats.chunks);
    Ok(stats)
}

/* ─────────────────────────── Écriture ─────────────────────────── */

/// Écrit le texte traité vers sa destination.
///
/// Un fichier ou périphérique est ouvert en ajout ; sans destination, le
/// texte part sur stdout, encadré des marqueurs de transcription
/// `; BST`/`; EST` quand la verbosité les laisse passer.
///
/// # Errors
/// [`ServerError::Io`] si l'ouverture ou l'écriture échoue.
pub fn write_output(text: &[u8], destination: Option<&Path>) -> ServerResult<()> {
    match destination {
        Some(path) => {
            let mut file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map_err(io_err("l'ouverture du fichier de sortie"))?;
            debug!("Fichier de sortie ouvert.");

            file.write_all(text).map_err(io_err("l'écriture du fichier de sortie"))?;
            debug!("Écriture de {} o terminée.", text.len());
        }
        None => {
            let mut stdout = io::stdout().lock();
            let transcript = log::log_enabled!(log::Level::Warn);

            if transcript {
                let _ = writeln!(stdout, "; BST"); // Begin-Stream-Transcript
            }
            stdout.write_all(text).map_err(io_err("l'écriture sur stdout"))?;
            if transcript {
                let _ = writeln!(stdout, "; EST"); // End-Stream-Transcript
            }

            let _ = stdout.flush();
        }
    }

    Ok(())
}

/* ─────────────────────────── Tests ─────────────────────────── */
