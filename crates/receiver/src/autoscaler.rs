//! Autoscaler - sizes every stage from its recent metric history
//!
//! Every poll tick, each stage is judged on its own:
//!
//! | Stage       | Metric                         | Action                    |
//! |-------------|--------------------------------|---------------------------|
//! | Listeners   | `busy_time_percent`            | add / remove a listener   |
//! | Processors  | processor queue `depth`        | add / remove a processor  |
//! | Defrag      | shard `total_buckets`          | add / remove a pair       |
//! | Deadline    | timeouts and fragment spacing  | move the deadline a step  |
//! | Queues      | current occupancy              | resize processor + output |
//!
//! Per-instance histories are combined slot by slot with a 10% trimmed mean,
//! so one misbehaving instance cannot drive the decision. Instances without a
//! full history are left out; a stage with no usable history holds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use sdsyslog_config::ReceiverConfig;
use sdsyslog_metrics::{Registry, Scale, mean, regression_slope, trimmed_mean_f64, trimmed_mean_u64};

use crate::manager::{DefragManager, IngestManager, OutputManager, ProcessorManager};
use crate::namespace;
use crate::shard;

/// Intervals of history each decision looks at
pub const SAMPLE_COUNT: usize = 5;

/// Fraction dropped from each end when combining instances
const TRIM: f64 = 0.10;

const LISTENER_HIGH_BUSY: f64 = 50.0;
const LISTENER_LOW_BUSY: f64 = 20.0;
const LISTENER_SLOPE: f64 = 0.5;

/// Whether listeners should be added or removed, from per-interval busy time
/// percentages, oldest first.
///
/// Busy and getting busier scales up; idle and getting idler scales down.
pub fn listener_trend(busy_percent: &[f64]) -> Scale {
    let Some(slope) = regression_slope(busy_percent) else {
        return Scale::Hold;
    };
    let avg = mean(busy_percent);

    if avg > LISTENER_HIGH_BUSY && slope > LISTENER_SLOPE {
        Scale::Up
    } else if avg < LISTENER_LOW_BUSY && slope < -LISTENER_SLOPE {
        Scale::Down
    } else {
        Scale::Hold
    }
}

/// Trimmed mean of each slot across instance histories.
///
/// `None` when no instance had a full history.
fn combine_f64(histories: &[Vec<f64>]) -> Option<Vec<f64>> {
    if histories.is_empty() {
        return None;
    }
    Some(
        (0..SAMPLE_COUNT)
            .map(|slot| {
                let column: Vec<f64> = histories.iter().map(|h| h[slot]).collect();
                trimmed_mean_f64(&column, TRIM)
            })
            .collect(),
    )
}

fn combine_u64(histories: &[Vec<u64>]) -> Option<Vec<u64>> {
    if histories.is_empty() {
        return None;
    }
    Some(
        (0..SAMPLE_COUNT)
            .map(|slot| {
                let column: Vec<u64> = histories.iter().map(|h| h[slot]).collect();
                trimmed_mean_u64(&column, TRIM)
            })
            .collect(),
    )
}

/// Step `current` by `step` in `direction`, clamped to `min..=max`
fn step_deadline(current: Duration, step: Duration, direction: Scale, min: Duration, max: Duration) -> Duration {
    let next = match direction {
        Scale::Up => current.saturating_add(step),
        Scale::Down => current.saturating_sub(step),
        Scale::Hold => current,
    };
    next.clamp(min, max)
}

/// Periodic scaling of every pipeline stage
pub struct Autoscaler {
    registry: Arc<Registry>,
    ingest: Arc<IngestManager>,
    processor: Arc<ProcessorManager>,
    defrag: Arc<DefragManager>,
    output: Arc<OutputManager>,
    poll_interval: Duration,
    /// Width of one registry slice
    metrics_interval: Duration,
    min_deadline: Duration,
    max_deadline: Duration,
    deadline_step: Duration,
}

impl Autoscaler {
    pub fn new(
        config: &ReceiverConfig,
        registry: Arc<Registry>,
        ingest: Arc<IngestManager>,
        processor: Arc<ProcessorManager>,
        defrag: Arc<DefragManager>,
        output: Arc<OutputManager>,
    ) -> Self {
        Self {
            registry,
            ingest,
            processor,
            defrag,
            output,
            poll_interval: config.autoscaling.poll_interval,
            metrics_interval: config.metrics.interval,
            min_deadline: config.defrag.min_packet_deadline,
            max_deadline: config.defrag.max_packet_deadline,
            deadline_step: config.defrag.deadline_step,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        debug!(poll_interval = ?self.poll_interval, "autoscaler started");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        debug!("autoscaler stopped");
    }

    /// One scaling pass over every stage
    pub async fn tick(&self) {
        self.scale_listeners().await;
        self.scale_processors().await;
        self.scale_assemblers().await;
        self.scale_deadline();
        self.scale_queues();
    }

    /// The last [`SAMPLE_COUNT`] values of `name` under `ns`, oldest first
    fn history(&self, name: &str, ns: &[String]) -> Option<Vec<sdsyslog_metrics::Metric>> {
        // One extra interval covers the slice truncation of the oldest sample
        let window = self.metrics_interval.saturating_mul(SAMPLE_COUNT as u32 + 1);
        let start = Utc::now() - chrono::Duration::from_std(window).ok()?;

        let found = self.registry.search(name, ns, Some(start), None);
        if found.len() < SAMPLE_COUNT {
            return None;
        }
        Some(found[found.len() - SAMPLE_COUNT..].to_vec())
    }

    fn history_u64(&self, name: &str, ns: &[String]) -> Option<Vec<u64>> {
        self.history(name, ns)?.iter().map(|m| m.value.raw.as_u64()).collect()
    }

    fn history_f64(&self, name: &str, ns: &[String]) -> Option<Vec<f64>> {
        Some(self.history(name, ns)?.iter().map(|m| m.value.raw.to_f64()).collect())
    }

    pub(crate) async fn scale_listeners(&self) {
        let histories: Vec<Vec<f64>> = self
            .ingest
            .instance_ids()
            .into_iter()
            .filter_map(|id| {
                let ns = namespace::child(&namespace::ingest_instance(id), namespace::LISTENER);
                self.history_f64("busy_time_percent", &ns)
            })
            .collect();
        let Some(series) = combine_f64(&histories) else {
            return;
        };

        let count = self.ingest.count();
        match listener_trend(&series) {
            Scale::Up if count < self.ingest.max() => match self.ingest.add_instance() {
                Ok(id) => info!(id, count = count + 1, "scaled up listeners"),
                Err(e) => error!(error = %e, "failed to scale up listeners"),
            },
            Scale::Down if count > self.ingest.min() => {
                if let Some(&id) = self.ingest.instance_ids().first() {
                    self.ingest.remove_instance(id).await;
                    info!(id, count = count - 1, "scaled down listeners");
                }
            }
            _ => {}
        }
    }

    pub(crate) async fn scale_processors(&self) {
        let Some(depths) = self.history_u64("depth", &namespace::processor_queue()) else {
            return;
        };

        let count = self.processor.count();
        match sdsyslog_queue::trend(&depths, self.processor.inbox().capacity()) {
            Scale::Up if count < self.processor.max() => {
                let id = self.processor.add_instance();
                info!(id, count = count + 1, "scaled up processors");
            }
            Scale::Down if count > self.processor.min() => {
                if let Some(&id) = self.processor.instance_ids().first() {
                    self.processor.remove_instance(id).await;
                    info!(id, count = count - 1, "scaled down processors");
                }
            }
            _ => {}
        }
    }

    pub(crate) async fn scale_assemblers(&self) {
        let histories: Vec<Vec<u64>> = self
            .defrag
            .instance_ids()
            .into_iter()
            .filter_map(|id| {
                let ns = namespace::child(&namespace::defrag_pair(id), namespace::QUEUE);
                self.history_u64("total_buckets", &ns)
            })
            .collect();
        let Some(series) = combine_u64(&histories) else {
            return;
        };

        let count = self.defrag.count();
        match shard::trend(&series) {
            Scale::Up if count < self.defrag.max() => {
                let id = self.defrag.add_instance().await;
                info!(id, count = count + 1, "scaled up defrag pairs");
            }
            Scale::Down if count > self.defrag.min() => {
                if let Some(&id) = self.defrag.instance_ids().first() {
                    self.defrag.remove_instance(id).await;
                    info!(id, count = count - 1, "scaled down defrag pairs");
                }
            }
            _ => {}
        }
    }

    /// Lengthen the packet deadline when buckets time out or fragments
    /// spread out, shorten it when neither happens
    pub(crate) fn scale_deadline(&self) {
        let mut spacing = Vec::new();
        let mut fragments = Vec::new();
        let mut timeouts = Vec::new();

        for id in self.defrag.instance_ids() {
            let ns = namespace::child(&namespace::defrag_pair(id), namespace::QUEUE);
            let (Some(s), Some(f), Some(t)) = (
                self.history_u64("sum_time_between_fragments", &ns),
                self.history_u64("push_ctn", &ns),
                self.history_u64("timed_out_buckets", &ns),
            ) else {
                continue;
            };
            spacing.push(s);
            fragments.push(f);
            timeouts.push(t);
        }

        let (Some(spacing), Some(fragments), Some(timeouts)) =
            (combine_u64(&spacing), combine_u64(&fragments), combine_u64(&timeouts))
        else {
            return;
        };

        let deadline = self.defrag.packet_deadline();
        let current = deadline.get();
        let direction = shard::trend_latency(&spacing, &fragments, &timeouts);
        let next = step_deadline(current, self.deadline_step, direction, self.min_deadline, self.max_deadline);

        if next != current {
            deadline.set(next);
            info!(from = ?current, to = ?next, "moved packet deadline");
        }
    }

    pub(crate) fn scale_queues(&self) {
        if let Some(capacity) = self.processor.inbox().scale_capacity() {
            debug!(capacity, "resized processor queue");
        }
        if let Some(capacity) = self.output.inbox().scale_capacity() {
            debug!(capacity, "resized output queue");
        }
    }
}

#[cfg(test)]
#[path = "autoscaler_test.rs"]
mod tests;
