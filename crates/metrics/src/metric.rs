//! Metric data model

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a metric value behaves between collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Interval total, reset on every collection
    Counter,
    /// Point-in-time level that can go up or down
    Gauge,
    /// Derived value (average, maximum) over the interval
    Summary,
}

impl MetricKind {
    /// Lowercase name used in logs and discovery output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Summary => "summary",
        }
    }
}

/// Raw numeric value of a metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Raw {
    U64(u64),
    F64(f64),
}

impl Raw {
    /// Integer view, `None` for floating point values
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            Self::F64(_) => None,
        }
    }

    /// Floating point view, `None` for integer values
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            Self::U64(_) => None,
        }
    }

    /// Lossy conversion used by aggregation
    pub fn to_f64(&self) -> f64 {
        match self {
            Self::U64(v) => *v as f64,
            Self::F64(v) => *v,
        }
    }
}

impl From<u64> for Raw {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<f64> for Raw {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl fmt::Display for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v:.2}"),
        }
    }
}

/// Value of a metric together with its unit and measurement window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValue {
    pub raw: Raw,
    /// e.g. "ns", "bytes", "count", "percent"
    pub unit: String,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
}

/// A single recorded metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    /// e.g. `total_buckets`, `depth`
    pub name: String,
    pub description: String,
    /// e.g. `["Receiver", "Ingest", "0", "Listener"]`
    pub namespace: Vec<String>,
    pub value: MetricValue,
    pub kind: MetricKind,
    /// When the value was read
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    /// Create a metric stamped with the current time
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        namespace: &[String],
        kind: MetricKind,
        raw: impl Into<Raw>,
        unit: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            namespace: namespace.to_vec(),
            value: MetricValue {
                raw: raw.into(),
                unit: unit.into(),
                interval,
            },
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Namespace joined with `/`, the registry's storage key
    pub fn namespace_path(&self) -> String {
        self.namespace.join("/")
    }
}

/// Build an owned namespace from string segments
pub fn namespace<S: AsRef<str>>(segments: &[S]) -> Vec<String> {
    segments.iter().map(|s| s.as_ref().to_string()).collect()
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
