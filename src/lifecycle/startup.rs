//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Own them in one [`GatewayContext`] passed to request handlers
//! - Start background tasks (health checks, limiter sweeps, config reload)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - No process-wide singletons; tests build isolated contexts
//! - Reload swaps admission-control settings only

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::{GatewayConfig, RateLimitConfig};
use crate::error::GatewayResult;
use crate::health::active::HealthMonitor;
use crate::health::HealthSource;
use crate::lifecycle::Shutdown;
use crate::providers::{
    FailoverManager, FailoverOptions, HttpTransport, ProviderDescriptor, ProviderTransport,
};
use crate::resilience::{BreakerOptions, CircuitBreakerRegistry};
use crate::security::{AdaptiveRateLimiter, RateLimitSettings, RateLimiter};

/// Every long-lived subsystem of a running gateway.
pub struct GatewayContext {
    config: ArcSwap<GatewayConfig>,
    pub registry: Arc<CircuitBreakerRegistry>,
    pub failover: Arc<FailoverManager>,
    /// Per-client limiter; `None` when admission control is disabled.
    pub client_limiter: Option<Arc<RateLimiter>>,
    /// Account-wide limiter.
    pub global_limiter: Option<Arc<RateLimiter>>,
    /// Health-scaled per-provider limiter.
    pub adaptive_limiter: Option<Arc<AdaptiveRateLimiter>>,
    pub shutdown: Shutdown,
}

impl GatewayContext {
    /// Build a context talking to providers over HTTP.
    pub fn build(config: GatewayConfig) -> GatewayResult<Self> {
        let transport = Arc::new(HttpTransport::new()?);
        Self::build_with_transport(config, transport)
    }

    pub fn build_with_transport(
        config: GatewayConfig,
        transport: Arc<dyn ProviderTransport>,
    ) -> GatewayResult<Self> {
        let registry = Arc::new(CircuitBreakerRegistry::new(BreakerOptions::from(
            &config.circuit_breaker,
        )));

        let descriptors = config.providers.iter().map(ProviderDescriptor::from).collect();
        let failover = Arc::new(FailoverManager::new(
            descriptors,
            &registry,
            FailoverOptions::from_config(&config.circuit_breaker, &config.health_check),
            transport,
        )?);

        let limits = &config.rate_limit;
        let (client_limiter, global_limiter, adaptive_limiter) = if limits.enabled {
            let client = Arc::new(limiter(
                "client",
                RateLimitSettings::from(&limits.client),
                limits,
            ));
            let global = limits
                .global
                .as_ref()
                .map(|g| Arc::new(limiter("global", RateLimitSettings::from(g), limits)));
            let adaptive = limits.adaptive.as_ref().map(|a| {
                let base = Arc::new(limiter(
                    "provider",
                    RateLimitSettings::from(&a.limits),
                    limits,
                ));
                let health: Arc<dyn HealthSource> = failover.clone();
                Arc::new(AdaptiveRateLimiter::new(base, health, a.default_provider.clone()))
            });
            (Some(client), global, adaptive)
        } else {
            tracing::warn!("Admission control disabled");
            (None, None, None)
        };

        tracing::info!(
            providers = config.providers.len(),
            current = %failover.current_provider(),
            rate_limiting = limits.enabled,
            global_limit = global_limiter.is_some(),
            adaptive_limit = adaptive_limiter.is_some(),
            "Gateway context initialized"
        );

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            registry,
            failover,
            client_limiter,
            global_limiter,
            adaptive_limiter,
            shutdown: Shutdown::new(),
        })
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    /// Start the health monitor and the limiter sweepers.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let config = self.config();
        let mut handles = Vec::new();

        if config.health_check.enabled {
            let monitor = HealthMonitor::new(self.failover.clone(), config.health_check.clone());
            handles.push(tokio::spawn(monitor.run(self.shutdown.subscribe())));
        }

        let sweep = Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1));
        for limiter in self.limiters() {
            handles.push(tokio::spawn(limiter.run_sweeper(sweep, self.shutdown.subscribe())));
        }

        handles
    }

    fn limiters(&self) -> Vec<Arc<RateLimiter>> {
        self.client_limiter
            .iter()
            .chain(self.global_limiter.iter())
            .cloned()
            .chain(self.adaptive_limiter.iter().map(|a| a.base().clone()))
            .collect()
    }

    /// Apply a reloaded configuration.
    ///
    /// Limit settings are swapped atomically. Provider, breaker and listener
    /// changes, and limiters added or removed, take effect on restart.
    pub fn apply_reload(&self, new_config: GatewayConfig) {
        let current = self.config();
        let providers_changed = serde_json::to_value(&current.providers).ok()
            != serde_json::to_value(&new_config.providers).ok();
        if providers_changed {
            tracing::warn!("Provider changes detected; they take effect after restart");
        }

        let limits = &new_config.rate_limit;
        if limits.enabled != current.rate_limit.enabled
            || limits.global.is_some() != self.global_limiter.is_some()
            || limits.adaptive.is_some() != self.adaptive_limiter.is_some()
        {
            tracing::warn!("Enabling or disabling limiters takes effect after restart");
        }

        if let Some(client) = &self.client_limiter {
            client.update_settings(RateLimitSettings::from(&limits.client));
        }
        if let (Some(global), Some(settings)) = (&self.global_limiter, &limits.global) {
            global.update_settings(RateLimitSettings::from(settings));
        }
        if let (Some(adaptive), Some(settings)) = (&self.adaptive_limiter, &limits.adaptive) {
            adaptive.base().update_settings(RateLimitSettings::from(&settings.limits));
        }

        self.config.store(Arc::new(new_config));
        tracing::info!("Configuration reloaded");
    }

    /// Apply configurations from the file watcher until shutdown.
    pub async fn run_reload_loop(
        self: Arc<Self>,
        mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => self.apply_reload(config),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Config reload loop stopped");
    }
}

fn limiter(
    scope: &'static str,
    settings: RateLimitSettings,
    limits: &RateLimitConfig,
) -> RateLimiter {
    RateLimiter::new(
        scope,
        settings,
        Duration::from_secs(limits.cache_ttl_secs),
        limits.max_entries,
    )
}
