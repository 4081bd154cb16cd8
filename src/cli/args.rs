//! CLI argument definitions using clap
//!
//! Commands:
//! - groupgate serve [--config <path>] [--port <port>]
//! - groupgate check-config --config <path>
//! - groupgate hash-password

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// groupgate - sessions, OAuth sign-in and hierarchical group permissions
#[derive(Parser, Debug)]
#[command(name = "groupgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server
    ///
    /// Without `--config` the defaults are used, still overridable through
    /// `GROUPGATE_*` environment variables.
    Serve {
        /// Path to a TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to bind to, overriding the configuration
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load and validate a configuration file, then exit
    CheckConfig {
        /// Path to a TOML configuration file
        #[arg(long, default_value = "./groupgate.toml")]
        config: PathBuf,
    },

    /// Hash a password read from stdin with Argon2id
    HashPassword,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_args() {
        let cli = Cli::try_parse_from(["groupgate", "serve", "--config", "gg.toml", "--port", "8080"]).unwrap();
        match cli.command {
            Command::Serve { config, port } => {
                assert_eq!(config, Some(PathBuf::from("gg.toml")));
                assert_eq!(port, Some(8080));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_check_config_default_path() {
        let cli = Cli::try_parse_from(["groupgate", "check-config"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::CheckConfig { config } if config == PathBuf::from("./groupgate.toml")
        ));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["groupgate", "migrate"]).is_err());
    }
}
