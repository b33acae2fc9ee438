//! Time-sliced metric registry
//!
//! Every collection round opens a time slice (the collection time truncated
//! to the interval) and components add their metrics into it. Readers search
//! across slices by name, namespace prefix and time window.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;

use crate::error::{MetricsError, Result};
use crate::metric::{Metric, MetricKind, MetricValue, Raw};

/// Default window used by [`Registry::aggregate`] when none is given
const DEFAULT_AGGREGATE_WINDOW_SECS: i64 = 60;

type NamespaceMap = BTreeMap<String, BTreeMap<String, Metric>>;

/// How [`Registry::aggregate`] combines values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Average,
    Min,
    Max,
}

impl FromStr for Aggregation {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "avg" | "average" => Ok(Self::Average),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(MetricsError::UnsupportedAggregation(other.to_string())),
        }
    }
}

/// Filters for [`Registry::discover`]; empty fields match everything
#[derive(Debug, Clone, Default)]
pub struct DiscoverFilter {
    /// Substring of the metric name
    pub name: Option<String>,
    /// Substring of the description
    pub description: Option<String>,
    pub namespace_prefix: Vec<String>,
    /// Exact unit
    pub unit: Option<String>,
    pub kind: Option<MetricKind>,
}

/// Central storage for time-based metrics
#[derive(Debug, Default)]
pub struct Registry {
    slices: RwLock<BTreeMap<DateTime<Utc>, NamespaceMap>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reuse) the slice for the interval containing `now`
    pub fn new_time_slice(&self, now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
        let slice = truncate(now, interval);
        self.slices.write().entry(slice).or_default();
        slice
    }

    /// Add a batch of metrics to an existing slice.
    ///
    /// Metrics for a slice that was never opened (or was already pruned) are
    /// discarded.
    pub fn add(&self, slice: DateTime<Utc>, metrics: Vec<Metric>) {
        let mut slices = self.slices.write();
        let Some(namespaces) = slices.get_mut(&slice) else {
            return;
        };

        for metric in metrics {
            namespaces
                .entry(metric.namespace_path())
                .or_default()
                .insert(metric.name.clone(), metric);
        }
    }

    /// All metrics matching `name` (empty = any) under `namespace_prefix`
    /// (empty = any) within the optional window, oldest slice first.
    pub fn search(
        &self,
        name: &str,
        namespace_prefix: &[String],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<Metric> {
        let slices = self.slices.read();
        let mut results = Vec::new();

        for (ts, namespaces) in slices.iter() {
            if start.is_some_and(|s| *ts < s) || end.is_some_and(|e| *ts > e) {
                continue;
            }
            for metrics in namespaces.values() {
                for (metric_name, metric) in metrics {
                    if !matches_namespace(&metric.namespace, namespace_prefix) {
                        // Every metric in this map shares the namespace
                        break;
                    }
                    if name.is_empty() || metric_name == name {
                        results.push(metric.clone());
                    }
                }
            }
        }

        results
    }

    /// Aggregate one metric (exact name and namespace) over a window.
    ///
    /// With no window the last minute is used.
    pub fn aggregate(
        &self,
        aggregation: Aggregation,
        name: &str,
        namespace: &[String],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Metric> {
        let (start, end) = match (start, end) {
            (None, None) => {
                let now = Utc::now();
                (Some(now - TimeDelta::seconds(DEFAULT_AGGREGATE_WINDOW_SECS)), Some(now))
            }
            window => window,
        };

        let found: Vec<Metric> = self
            .search(name, namespace, start, end)
            .into_iter()
            .filter(|m| m.namespace == namespace)
            .collect();

        let Some(first) = found.first() else {
            return Err(MetricsError::NoResults {
                name: name.to_string(),
            });
        };

        let values = found.iter().map(|m| m.value.raw.to_f64());
        let value: f64 = match aggregation {
            Aggregation::Sum => values.sum(),
            Aggregation::Average => values.sum::<f64>() / found.len() as f64,
            Aggregation::Min => values.fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.fold(f64::NEG_INFINITY, f64::max),
        };

        Ok(Metric {
            name: first.name.clone(),
            description: first.description.clone(),
            namespace: first.namespace.clone(),
            value: MetricValue {
                raw: Raw::F64(value),
                unit: first.value.unit.clone(),
                interval: first.value.interval,
            },
            kind: first.kind,
            timestamp: Utc::now(),
        })
    }

    /// Unique metric descriptors matching `filter`, independent of time.
    ///
    /// Returned metrics carry a zero value and epoch timestamp. Sorted by
    /// name, then namespace.
    pub fn discover(&self, filter: &DiscoverFilter) -> Vec<Metric> {
        let slices = self.slices.read();
        let mut seen: HashMap<(String, String, MetricKind, String), Metric> = HashMap::new();

        for namespaces in slices.values() {
            for (ns_path, metrics) in namespaces {
                for metric in metrics.values() {
                    if !matches_namespace(&metric.namespace, &filter.namespace_prefix) {
                        break;
                    }
                    if !filter_accepts(filter, metric) {
                        continue;
                    }

                    let key = (
                        ns_path.clone(),
                        metric.name.clone(),
                        metric.kind,
                        metric.value.unit.clone(),
                    );
                    seen.entry(key).or_insert_with(|| Metric {
                        name: metric.name.clone(),
                        description: metric.description.clone(),
                        namespace: metric.namespace.clone(),
                        value: MetricValue {
                            raw: Raw::U64(0),
                            unit: metric.value.unit.clone(),
                            interval: Duration::ZERO,
                        },
                        kind: metric.kind,
                        timestamp: DateTime::<Utc>::default(),
                    });
                }
            }
        }

        let mut results: Vec<Metric> = seen.into_values().collect();
        results.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.namespace_path().cmp(&b.namespace_path()))
        });
        results
    }

    /// Delete slices older than `max_age` relative to `now`.
    ///
    /// Returns the number of slices removed.
    pub fn prune(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let max_age = TimeDelta::from_std(max_age).unwrap_or_else(|_| TimeDelta::days(36_500));
        let mut slices = self.slices.write();
        let before = slices.len();
        slices.retain(|ts, _| now.signed_duration_since(*ts) <= max_age);
        before - slices.len()
    }

    /// Number of time slices currently held
    pub fn slice_count(&self) -> usize {
        self.slices.read().len()
    }
}

/// Exact or prefix namespace match; an empty prefix matches everything
fn matches_namespace(namespace: &[String], prefix: &[String]) -> bool {
    namespace.len() >= prefix.len() && namespace.iter().zip(prefix).all(|(a, b)| a == b)
}

fn filter_accepts(filter: &DiscoverFilter, metric: &Metric) -> bool {
    if let Some(name) = &filter.name
        && !metric.name.contains(name.as_str())
    {
        return false;
    }
    if let Some(desc) = &filter.description
        && !metric.description.contains(desc.as_str())
    {
        return false;
    }
    if let Some(unit) = &filter.unit
        && &metric.value.unit != unit
    {
        return false;
    }
    if let Some(kind) = filter.kind
        && metric.kind != kind
    {
        return false;
    }
    true
}

/// Round `now` down to a multiple of `interval` since the epoch
fn truncate(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_millis() as i64;
    if step <= 0 {
        return now;
    }
    let ms = now.timestamp_millis();
    DateTime::from_timestamp_millis(ms - ms.rem_euclid(step)).unwrap_or(now)
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
