//! Metrics gatherer
//!
//! Collects a round from every registered component once per interval and
//! stores it in the registry under a fresh time slice. Ticks at half the
//! interval so a round is never more than half an interval late, and prunes
//! old slices every [`PRUNE_EVERY_TICKS`] ticks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use sdsyslog_config::MetricsConfig;
use sdsyslog_metrics::{MetricsProvider, Registry};

/// Ticks between registry prunes
pub const PRUNE_EVERY_TICKS: u64 = 30;

/// Builder for constructing a [`Gatherer`]
#[derive(Default)]
pub struct GathererBuilder {
    config: Option<MetricsConfig>,
    registry: Option<Arc<Registry>>,
    providers: Vec<Arc<dyn MetricsProvider>>,
}

impl GathererBuilder {
    pub fn config(mut self, config: MetricsConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a component to collect from
    pub fn provider(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Gatherer {
        let config = self.config.unwrap_or_default();
        Gatherer {
            registry: self.registry.unwrap_or_default(),
            providers: self.providers,
            interval: config.interval,
            max_age: config.max_age,
        }
    }
}

/// Periodic metric collection into the registry
pub struct Gatherer {
    registry: Arc<Registry>,
    providers: Vec<Arc<dyn MetricsProvider>>,
    interval: Duration,
    max_age: Duration,
}

impl Gatherer {
    pub fn builder() -> GathererBuilder {
        GathererBuilder::default()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run until cancelled. This is the entry point to spawn.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval((self.interval / 2).max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval = ?self.interval, providers = self.providers.len(), "metrics gatherer started");

        let mut last_collection = Instant::now();
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            ticks += 1;
            if last_collection.elapsed() >= self.interval {
                last_collection = Instant::now();
                self.collect();
            }
            if ticks % PRUNE_EVERY_TICKS == 0 {
                self.prune();
            }
        }

        debug!("metrics gatherer stopped");
    }

    /// Collect one round into a new slice. Returns the number of metrics
    /// stored.
    pub fn collect(&self) -> usize {
        let slice = self.registry.new_time_slice(Utc::now(), self.interval);

        let mut stored = 0;
        for provider in &self.providers {
            let metrics = provider.collect_metrics(self.interval);
            stored += metrics.len();
            self.registry.add(slice, metrics);
        }
        stored
    }

    fn prune(&self) {
        let removed = self.registry.prune(Utc::now(), self.max_age);
        if removed > 0 {
            debug!(removed, "pruned metric slices");
        }
    }
}
