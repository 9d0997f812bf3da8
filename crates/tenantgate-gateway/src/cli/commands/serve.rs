//! Serve command implementation

use clap::Args;
use tracing::info;

use super::ConfigArgs;
use crate::error::GatewayResult;
use crate::server;

/// Run the gateway until Ctrl-C or SIGTERM
///
/// SIGHUP reloads the route table from the same file.
///
/// # Examples
///
///   tenantgate serve --config /etc/tenantgate/gateway.yaml
///   tenantgate serve -c gateway.yaml --listen 127.0.0.1:9000
#[derive(Debug, Args)]
pub struct ServeCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Override the configured listen address
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,
}

impl ServeCommand {
    /// Execute the serve command
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the server fails.
    pub async fn execute(self) -> GatewayResult<()> {
        let mut config = self.config.load()?;
        if let Some(listen) = self.listen {
            config.listen = listen;
            config.validate()?;
        }

        info!(
            listen = %config.listen,
            issuer = %config.auth.issuer_url,
            routes = config.route_table.len(),
            clusters = config.backend_clusters.len(),
            fail_mode = ?config.fail_mode,
            "Starting tenantgate"
        );
        server::run(config, Some(self.config.config)).await
    }
}
