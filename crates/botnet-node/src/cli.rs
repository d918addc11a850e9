//! Clap CLI definitions for the node daemon.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// BotNet node: hosts agents and federates with neighboring nodes.
#[derive(Parser, Debug)]
#[command(name = "botnet-node", version, about)]
pub struct Cli {
    /// Path to config file. Defaults to `~/.botnet/botnet.toml`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset. Overrides `log_level`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit JSON log lines instead of text.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Boot the node and run until Ctrl+C (the default).
    Start,
    /// Print the node's public key and the DNS records to publish.
    Identity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_no_subcommand() {
        let cli = Cli::try_parse_from(["botnet-node"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
        assert!(!cli.json_logs);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "botnet-node",
            "start",
            "--config",
            "/tmp/botnet.toml",
            "--log-level",
            "debug",
            "--json-logs",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Commands::Start));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/botnet.toml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.json_logs);
    }

    #[test]
    fn test_init_force() {
        let cli = Cli::try_parse_from(["botnet-node", "init", "--force"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Init { force: true }));
    }
}
