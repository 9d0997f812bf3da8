//! Route command implementation

use clap::Args;
use colored::Colorize;
use http::Method;

use super::ConfigArgs;
use crate::error::{GatewayError, GatewayResult};
use crate::routing::RouteTable;

/// Explain where a request would be routed
///
/// # Examples
///
///   tenantgate route -c gateway.yaml GET /api/cost-management/v1/reports/
///   tenantgate route -c gateway.yaml POST '/api/ingress/v1/upload?force=1'
#[derive(Debug, Args)]
pub struct RouteCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// HTTP method
    pub method: String,

    /// Request path, optionally with a query string
    pub path: String,
}

impl RouteCommand {
    /// Execute the route command
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NoRoute`] if nothing matches, or the load error.
    pub fn execute(self) -> GatewayResult<()> {
        let config = self.config.load()?;
        let table = RouteTable::compile(&config.route_table)?;
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| GatewayError::BadRequest(format!("invalid method '{}'", self.method)))?;

        let decision = table.route(&method, &self.path)?;
        println!(
            "{} {} {} {} {}",
            method,
            self.path,
            "→".green().bold(),
            decision.backend_cluster_name.bold(),
            format!("(forwarded as {})", decision.rewritten_path).dimmed()
        );
        Ok(())
    }
}
