
use clap::{Parser, Subcommand};
use chrono::Datelike;
use lazy_static::lazy_static;
use log::error;
use std::path::Path;

use crate::cli::typing::TypeSettings;

lazy_static! {
    /// Stores the full version string we plan to use, which is generated in build.rs
    /// # Examples
    /// * `0.4.0-6bb9635-dirty` - while on a dirty branch
    /// * `0.4.0-6bb9635` - with a fresh commit
    pub static ref FULL_VERSION: String = format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("VERGEN_GIT_DESCRIBE"));

    /// Shared after-help string with the license pointer.
    pub static ref AFTER_HELP: String = format!("Copyright (C) 2023-{}     hlatyper contributors
Distributed under the MIT license; this tool is intended for
Research Use Only and not for use in diagnostic procedures.", chrono::Utc::now().year());
}

#[derive(Parser)]
#[clap(author,
    version = &**FULL_VERSION,
    about,
    after_help = &**AFTER_HELP)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands
}

/// hlatyper, a tool for HLA genotyping from short reads using allele graphs.
/// Select a subcommand to see more usage information:
#[derive(Subcommand)]
pub enum Commands {
    /// Type a read set against an allele alignment
    Type(Box<TypeSettings>)
}

pub fn get_cli() -> Cli {
    Cli::parse()
}

/// Verifies a user-supplied input file exists, exiting the process otherwise.
/// # Arguments
/// * `filename` - the path to verify
/// * `label` - what to call the file in the error message
pub fn check_required_filename(filename: &Path, label: &str) {
    if !filename.exists() {
        error!("{label} does not exist: \"{}\"", filename.display());
        std::process::exit(exitcode::NOINPUT);
    }
}
