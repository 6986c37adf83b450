//! `copris` — binaire principal de COPRIS
//!
//! Ici on fait uniquement : parsing d'arguments, initialisation du
//! logger, et délégation à `copris_cli` (lib). Le texte voyage du client
//! (TCP ou stdin) vers l'imprimante (fichier, périphérique ou stdout) en
//! passant par les deux jeux de règles de l'utilisateur.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use log::{warn, LevelFilter};

use copris_cli as cli;
use copris_core::{Attribs, Cutoff};

/* ─────────────────────────── CLI (clap) ─────────────────────────── */

#[derive(Debug, Parser)]
#[command(
    name = "copris",
    version,
    about = "COPRIS — serveur d'impression convertisseur",
    long_about = "COPRIS reçoit un texte (TCP ou stdin), le convertit selon un fichier \
                  d'encodage et un fichier de fonctionnalités d'imprimante, puis \
                  l'écrit vers une imprimante, un fichier ou stdout."
)]
struct Opt {
    /// Port TCP d'écoute ; sans port, lecture depuis stdin
    #[arg(short = 'p', long = "port", value_name = "N")]
    port: Option<u16>,

    /// Continuer à servir après chaque flux
    #[arg(short = 'd', long = "daemon")]
    daemon: bool,

    /// Fichier d'encodage de caractères
    #[arg(short = 'e', long = "encoding", value_name = "FICHIER")]
    encoding: Option<PathBuf>,

    /// Fichier de fonctionnalités d'imprimante
    #[arg(short = 'f', long = "feature", value_name = "FICHIER")]
    feature: Option<PathBuf>,

    /// Limite d'octets par flux (0 = aucune limite)
    #[arg(long = "limit", value_name = "N", default_value_t = 0)]
    limit: usize,

    /// Couper le texte à la limite au lieu de l'écarter en entier
    #[arg(long = "cutoff-limit")]
    cutoff_limit: bool,

    /// Retirer les octets ni ASCII imprimables ni blancs
    #[arg(long = "ignore-non-ascii")]
    ignore_non_ascii: bool,

    /// Augmente la verbosité (-v, -vv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Mode silencieux : rien que les erreurs, sur stderr
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Affiche un gabarit de fichier de fonctionnalités et sort
    #[arg(long = "dump-commands")]
    dump_commands: bool,

    /// Destination de sortie (imprimante ou fichier) ; absente → stdout
    destination: Option<PathBuf>,
}

fn init_logger(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    };

    env_logger::Builder::new().filter_level(level).init();
}

fn main() -> ExitCode {
    let opt = Opt::parse();
    init_logger(opt.verbose, opt.quiet);

    if opt.dump_commands {
        print!("{}", copris_features::dump_commands());
        return ExitCode::SUCCESS;
    }

    if std::env::args().len() < 2 {
        warn!("Sans argument, COPRIS ne fera pas grand-chose. Essayez '--help'.");
    }

    if let Some(port) = opt.port {
        if port == 0 {
            eprintln!("Le port 0 n'est pas un port d'écoute valable.");
            return ExitCode::FAILURE;
        }
    }

    let attrib = Attribs {
        destination: opt.destination,
        port: opt.port,
        daemon: opt.daemon,
        limit: opt.limit,
        cutoff: if opt.cutoff_limit { Cutoff::Truncate } else { Cutoff::Discard },
        encoding_file: opt.encoding,
        feature_file: opt.feature,
        filter_non_ascii: opt.ignore_non_ascii,
    };

    match cli::run(attrib, opt.quiet) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("copris : {e:#}");
            ExitCode::FAILURE
        }
    }
}
