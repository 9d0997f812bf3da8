//! Check-config command implementation

use std::fmt::Write as _;

use clap::Args;
use colored::Colorize;

use super::ConfigArgs;
use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::routing::RouteTable;

/// Load and validate a configuration file
///
/// Prints the routing table in match order and the clusters it targets.
/// Nothing is contacted: neither the identity provider nor any backend.
#[derive(Debug, Args)]
pub struct CheckConfigCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Print the fully resolved configuration (defaults and environment applied) as JSON
    #[arg(long)]
    pub resolved: bool,
}

impl CheckConfigCommand {
    /// Execute the check-config command
    ///
    /// # Errors
    ///
    /// Returns the load or validation error.
    pub fn execute(self) -> GatewayResult<()> {
        let config = self.config.load()?;
        if self.resolved {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        print!("{}", summary(&config)?);
        Ok(())
    }
}

/// Human-readable summary of a valid configuration
///
/// # Errors
///
/// Returns an error if the route table does not compile.
pub fn summary(config: &GatewayConfig) -> GatewayResult<String> {
    let table = RouteTable::compile(&config.route_table)?;
    let mut out = String::new();

    let _ = writeln!(out, "{} Configuration is valid", "✓".green().bold());
    let _ = writeln!(out, "  listen:    {}", config.listen);
    let _ = writeln!(out, "  issuer:    {}", config.auth.issuer_url);
    let _ = writeln!(out, "  jwks:      {}", config.auth.jwks_uri());
    if config.auth.audiences.is_empty() {
        let _ = writeln!(out, "  audiences: {}", "none (audience not checked)".yellow());
    } else {
        let _ = writeln!(out, "  audiences: {}", config.auth.audiences.join(", "));
    }
    let _ = writeln!(out, "  fail mode: {:?}", config.fail_mode);

    let _ = writeln!(out, "\n{}", "Routes (match order):".bold());
    for rule in table.rules() {
        let _ = writeln!(out, "  {rule}");
    }

    let _ = writeln!(out, "\n{}", "Clusters:".bold());
    for cluster in &config.backend_clusters {
        let probe = cluster
            .health_check_path
            .as_deref()
            .map_or_else(|| "passive only".to_string(), |p| format!("probe {p}"));
        let _ = writeln!(
            out,
            "  {} ({:?}, {probe}): {}",
            cluster.name,
            cluster.balance,
            cluster.endpoints.join(", ")
        );
    }
    Ok(out)
}
