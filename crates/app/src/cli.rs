use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;

use crate::run::{EXIT_FAILURE, EXIT_OK};

/// Post an Apple App Store receipt to YNAB, splitting tax across subscriptions.
#[derive(Debug, Parser)]
#[command(name = "appledger", version)]
pub struct Cli {
    /// Receipt file (.eml preferred, or .pdf). Omit when app.mode is "email".
    pub receipt_path: Option<PathBuf>,

    /// Config file (default: ./config.toml, then the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Append run log entries to this file instead of app.log_path
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Parse, match and build without calling the YNAB API
    #[arg(long)]
    pub dry_run: bool,

    /// Retry duplicates under a fresh receipt id suffix
    #[arg(long)]
    pub reimport: bool,
}

/// Exit code for a command line clap rejected. Help and version output succeed;
/// anything else is a usage error, never clap's own `2`.
pub fn usage_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
        _ => EXIT_FAILURE,
    }
}
