//! Active health checking.
//!
//! # Responsibilities
//! - Periodically health-check providers through the failover controller
//! - Stop on the shutdown broadcast

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::providers::FailoverManager;

pub struct HealthMonitor {
    manager: Arc<FailoverManager>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(manager: Arc<FailoverManager>, config: HealthCheckConfig) -> Self {
        Self { manager, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            timeout_ms = self.config.timeout_ms,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        // The first tick completes immediately; providers start out admitted.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.manager.check_health().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
