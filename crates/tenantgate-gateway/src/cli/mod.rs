//! Command-line interface
//!
//! ```text
//! cli/
//! ├── commands/     # One module per subcommand
//! └── error.rs      # User-friendly error display
//! ```

pub mod commands;
pub mod error;

use std::io::IsTerminal;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::error::GatewayResult;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Human,
    /// One JSON object per event
    Json,
}

/// tenantgate - authenticating API gateway
///
/// Validates bearer JWTs, injects the tenant identity header and routes
/// requests to backend clusters.
#[derive(Parser, Debug)]
#[command(
    name = "tenantgate",
    version,
    about = "Authenticating API gateway with tenant identity headers and read/write routing",
    author
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: commands::Command,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log format
    #[arg(long, value_enum, default_value = "human", global = true, env = "TENANTGATE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    /// Execute the CLI command
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if command execution fails.
    pub async fn execute(self) -> GatewayResult<()> {
        self.init_tracing();

        if self.no_color || !std::io::stdout().is_terminal() {
            colored::control::set_override(false);
        }

        self.command.execute().await
    }

    /// Default filter directive for the verbosity flags
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug,hyper=info,reqwest=info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Initialize tracing; `RUST_LOG` overrides the verbosity flags
    fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_directive()));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr);

        let result = match self.log_format {
            LogFormat::Human => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
        if let Err(e) = result {
            eprintln!("tracing already initialized: {e}");
        }
    }
}
