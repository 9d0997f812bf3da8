//! Active health checking
//!
//! One task per cluster with a `health_check_path`. Each tick probes every
//! endpoint concurrently; a 2xx answer counts as success, anything else
//! (including a connect failure or a probe slower than the connect timeout)
//! as failure.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{BackendCluster, ClusterRegistry};

/// Start probe tasks for every cluster that configures a probe path
///
/// Tasks run until aborted; dropping the handles does not stop them.
pub fn spawn_health_checks(registry: &ClusterRegistry) -> Vec<JoinHandle<()>> {
    registry
        .iter()
        .filter(|cluster| cluster.health_check_path().is_some())
        .map(|cluster| {
            let cluster = Arc::clone(cluster);
            info!(
                cluster = %cluster.name(),
                interval_secs = cluster.health_check_interval().as_secs(),
                "Starting active health checks"
            );
            tokio::spawn(async move { run(cluster).await })
        })
        .collect()
}

async fn run(cluster: Arc<BackendCluster>) {
    let mut ticker = tokio::time::interval(cluster.health_check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        probe_all(&cluster).await;
    }
}

/// Probe every endpoint of a cluster once
pub async fn probe_all(cluster: &BackendCluster) {
    let Some(path) = cluster.health_check_path() else {
        return;
    };
    let probes = (0..cluster.endpoints().len()).map(|index| async move {
        let healthy = probe(cluster, index, path).await;
        if healthy {
            cluster.record_success(index);
        } else {
            cluster.record_failure(index);
        }
    });
    join_all(probes).await;
}

async fn probe(cluster: &BackendCluster, index: usize, path: &str) -> bool {
    let Some(endpoint) = cluster.endpoint(index) else {
        return false;
    };
    let url = endpoint.url_for(path);
    match cluster
        .client()
        .get(&url)
        .timeout(cluster.connect_timeout())
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            debug!(cluster = %cluster.name(), %url, status = %response.status(), "Probe failed");
            false
        }
        Err(e) => {
            debug!(cluster = %cluster.name(), %url, error = %e, "Probe failed");
            false
        }
    }
}
