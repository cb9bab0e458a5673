//! CLI interface for foreman
//!
//! This module provides the command-line interface using clap's derive
//! API. It defines all commands and global flags for running the engine.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Foreman task-orchestration engine
///
/// Decomposes natural-language tasks into agent workflows and runs them
/// against a locally-hosted model endpoint.
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP front-end
    Serve {
        /// Bind host (overrides config and HTTP_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides config and HTTP_PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Execute a single task from the terminal
    Run {
        /// The task to execute
        task: String,

        /// Aggregation format (summary, detailed, json)
        #[arg(long, default_value = "detailed")]
        format: String,
    },

    /// List the persona library with scores
    Personas,

    /// Check configuration and inference backend reachability
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::parse_from(["foreman", "serve"]);
        match cli.command {
            Command::Serve { host, port } => {
                assert!(host.is_none());
                assert!(port.is_none());
            }
            _ => panic!("Expected Serve command"),
        }
        assert!(!cli.json);
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::parse_from(["foreman", "serve", "--host", "127.0.0.1", "--port", "9999"]);
        match cli.command {
            Command::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("127.0.0.1"));
                assert_eq!(port, Some(9999));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["foreman", "run", "say hi"]);
        match cli.command {
            Command::Run { task, format } => {
                assert_eq!(task, "say hi");
                assert_eq!(format, "detailed");
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["foreman", "--json", "--log", "debug", "personas"]);
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Personas));
    }

    #[test]
    fn test_doctor() {
        let cli = Cli::parse_from(["foreman", "doctor"]);
        assert!(matches!(cli.command, Command::Doctor));
    }
}
