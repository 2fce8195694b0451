//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CGN - benefit card lifecycle service
#[derive(Parser, Debug)]
#[command(name = "cgn")]
#[command(version)]
#[command(about = "Durable activation, revocation, and expiration workflows for benefit cards")]
pub struct Cli {
    /// Configuration file (TOML). Defaults and CGN_* variables apply without it.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resume pending instances and serve the HTTP API
    Serve,

    /// Delete finished instances older than the retention window, then exit
    Purge,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_with_config() {
        let cli = Cli::try_parse_from(["cgn", "serve", "--config", "cgn.toml"]);
        assert!(matches!(
            cli,
            Ok(Cli { command: Commands::Serve, config: Some(path) }) if path == PathBuf::from("cgn.toml")
        ));
    }
}
