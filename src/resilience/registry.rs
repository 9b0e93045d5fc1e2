//! Named breaker registry.
//!
//! # Responsibilities
//! - Create or look up breakers by name
//! - Attach the structured-log listener and the transition channel to each
//! - Aggregate statistics for the admin API

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::observability::metrics;
use crate::resilience::circuit_breaker::{
    BreakerEvent, BreakerOptions, BreakerState, BreakerStats, CircuitBreaker, TransitionListener,
};

/// Logs and counts every transition.
#[derive(Debug, Default)]
pub struct TracingListener;

impl TransitionListener for TracingListener {
    fn on_transition(&self, event: &BreakerEvent) {
        match event.to {
            BreakerState::Open => tracing::warn!(
                breaker = %event.name,
                from = %event.from,
                failure_count = event.failure_count,
                total_requests = event.total_requests,
                "Circuit breaker opened"
            ),
            BreakerState::HalfOpen => tracing::info!(
                breaker = %event.name,
                "Circuit breaker half-open, allowing trial call"
            ),
            BreakerState::Closed => tracing::info!(
                breaker = %event.name,
                from = %event.from,
                "Circuit breaker closed"
            ),
        }
        metrics::record_breaker_transition(&event.name, event.to.as_str());
    }
}

/// Publishes transitions to subscribers of a broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: broadcast::Sender<BreakerEvent>,
}

impl ChannelListener {
    pub fn new(tx: broadcast::Sender<BreakerEvent>) -> Self {
        Self { tx }
    }
}

impl TransitionListener for ChannelListener {
    fn on_transition(&self, event: &BreakerEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
    }
}

/// Registry of breakers keyed by name.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    listeners: Vec<Arc<dyn TransitionListener>>,
    events: broadcast::Sender<BreakerEvent>,
    defaults: BreakerOptions,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers log transitions and publish them on
    /// the registry channel.
    pub fn new(defaults: BreakerOptions) -> Self {
        let (events, _) = broadcast::channel(256);
        let listeners: Vec<Arc<dyn TransitionListener>> = vec![
            Arc::new(TracingListener),
            Arc::new(ChannelListener::new(events.clone())),
        ];
        Self {
            breakers: DashMap::new(),
            listeners,
            events,
            defaults,
        }
    }

    /// Register an additional listener for breakers created from now on.
    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Return the breaker for `name`, creating it with `options` (or the
    /// registry defaults) when absent. Options of an existing breaker are kept.
    pub fn get_or_create(
        &self,
        name: &str,
        options: Option<BreakerOptions>,
    ) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = %name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::with_listeners(
                    name,
                    options.unwrap_or_else(|| self.defaults.clone()),
                    self.listeners.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.value().clone())
    }

    /// Statistics of every breaker, sorted by name.
    pub fn all_stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.value().reset();
        }
        tracing::info!(count = self.breakers.len(), "All circuit breakers reset");
    }

    /// Drop a breaker from the registry. Holders of the `Arc` keep using it.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, b)| b)
    }

    /// Receive every transition of every registered breaker.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerOptions::default())
    }
}
