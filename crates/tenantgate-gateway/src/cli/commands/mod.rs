//! CLI command implementations
//!
//! Each command is implemented as a struct that can execute independently.

pub mod check_config;
pub mod inspect_token;
pub mod route;
pub mod serve;

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::config::GatewayConfig;
use crate::error::GatewayResult;

/// All available CLI commands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway
    #[command(visible_alias = "s")]
    Serve(serve::ServeCommand),

    /// Load and validate a configuration file, then print a summary
    CheckConfig(check_config::CheckConfigCommand),

    /// Explain where a request would be routed
    Route(route::RouteCommand),

    /// Decode an identity header value
    InspectToken(inspect_token::InspectTokenCommand),
}

impl Command {
    /// Execute the command
    ///
    /// # Errors
    ///
    /// Returns the command's error.
    pub async fn execute(self) -> GatewayResult<()> {
        match self {
            Command::Serve(cmd) => cmd.execute().await,
            Command::CheckConfig(cmd) => cmd.execute(),
            Command::Route(cmd) => cmd.execute(),
            Command::InspectToken(cmd) => cmd.execute(),
        }
    }
}

/// Shared `--config` argument
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Configuration file (.yaml, .yml, .toml or .json)
    #[arg(short, long, value_name = "FILE", env = "TENANTGATE_CONFIG")]
    pub config: PathBuf,
}

impl ConfigArgs {
    /// Load and validate the configuration
    ///
    /// # Errors
    ///
    /// Returns the load or validation error.
    pub fn load(&self) -> GatewayResult<GatewayConfig> {
        GatewayConfig::from_file(&self.config)
    }
}
