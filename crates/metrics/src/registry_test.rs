//! Registry tests

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{Aggregation, DiscoverFilter, Metric, MetricKind, MetricsError, Registry, namespace};

const INTERVAL: Duration = Duration::from_secs(10);

/// Helper to build a metric at a fixed timestamp
fn metric(name: &str, ns: &[&str], value: u64, kind: MetricKind) -> Metric {
    Metric::new(name, format!("{name} description"), &namespace(ns), kind, value, "count", INTERVAL)
}

/// Helper to get a base time aligned to the interval
fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Helper to fill `n` consecutive slices with a single metric each
fn fill_slices(registry: &Registry, name: &str, ns: &[&str], values: &[u64]) -> Vec<DateTime<Utc>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let now = base_time() + TimeDelta::seconds(10 * i as i64);
            let slice = registry.new_time_slice(now, INTERVAL);
            registry.add(slice, vec![metric(name, ns, *v, MetricKind::Gauge)]);
            slice
        })
        .collect()
}

// ============================================================================
// Time slices
// ============================================================================

#[test]
fn test_new_time_slice_truncates() {
    let registry = Registry::new();
    let now = base_time() + TimeDelta::milliseconds(7_500);

    let slice = registry.new_time_slice(now, INTERVAL);

    assert_eq!(slice, base_time());
    assert_eq!(registry.slice_count(), 1);
}

#[test]
fn test_new_time_slice_reuses_existing() {
    let registry = Registry::new();
    let a = registry.new_time_slice(base_time(), INTERVAL);
    let b = registry.new_time_slice(base_time() + TimeDelta::seconds(3), INTERVAL);

    assert_eq!(a, b);
    assert_eq!(registry.slice_count(), 1);
}

#[test]
fn test_add_to_unknown_slice_is_ignored() {
    let registry = Registry::new();
    registry.add(base_time(), vec![metric("depth", &["Receiver"], 1, MetricKind::Gauge)]);

    assert_eq!(registry.slice_count(), 0);
    assert!(registry.search("", &[], None, None).is_empty());
}

#[test]
fn test_add_overwrites_same_name_in_slice() {
    let registry = Registry::new();
    let slice = registry.new_time_slice(base_time(), INTERVAL);
    registry.add(slice, vec![metric("depth", &["Receiver", "Output"], 1, MetricKind::Gauge)]);
    registry.add(slice, vec![metric("depth", &["Receiver", "Output"], 9, MetricKind::Gauge)]);

    let found = registry.search("depth", &[], None, None);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].value.raw.as_u64(), Some(9));
}

// ============================================================================
// Search
// ============================================================================

#[test]
fn test_search_orders_oldest_first() {
    let registry = Registry::new();
    fill_slices(&registry, "total_buckets", &["Receiver", "Defrag", "0", "Queue"], &[1, 2, 3, 4]);

    let found = registry.search("total_buckets", &namespace(&["Receiver", "Defrag", "0"]), None, None);
    let values: Vec<u64> = found.iter().filter_map(|m| m.value.raw.as_u64()).collect();

    assert_eq!(values, vec![1, 2, 3, 4]);
}

#[test]
fn test_search_namespace_prefix() {
    let registry = Registry::new();
    let slice = registry.new_time_slice(base_time(), INTERVAL);
    registry.add(
        slice,
        vec![
            metric("total_buckets", &["Receiver", "Defrag", "0", "Queue"], 1, MetricKind::Gauge),
            metric("total_buckets", &["Receiver", "Defrag", "1", "Queue"], 2, MetricKind::Gauge),
            metric("depth", &["Receiver", "Output", "Queue"], 3, MetricKind::Gauge),
        ],
    );

    assert_eq!(registry.search("", &namespace(&["Receiver"]), None, None).len(), 3);
    assert_eq!(registry.search("", &namespace(&["Receiver", "Defrag"]), None, None).len(), 2);

    let one = registry.search("total_buckets", &namespace(&["Receiver", "Defrag", "1"]), None, None);
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].value.raw.as_u64(), Some(2));

    // Prefix longer than the namespace never matches
    let deep = namespace(&["Receiver", "Output", "Queue", "Extra"]);
    assert!(registry.search("depth", &deep, None, None).is_empty());
}

#[test]
fn test_search_time_window() {
    let registry = Registry::new();
    let slices = fill_slices(&registry, "depth", &["Receiver", "Processor", "Queue"], &[10, 20, 30, 40, 50]);

    let found = registry.search("depth", &[], Some(slices[1]), Some(slices[3]));
    let values: Vec<u64> = found.iter().filter_map(|m| m.value.raw.as_u64()).collect();
    assert_eq!(values, vec![20, 30, 40]);

    let open_end = registry.search("depth", &[], Some(slices[3]), None);
    assert_eq!(open_end.len(), 2);
}

// ============================================================================
// Aggregate
// ============================================================================

#[test]
fn test_aggregate_kinds() {
    let registry = Registry::new();
    let ns = ["Receiver", "Processor", "Queue"];
    let slices = fill_slices(&registry, "depth", &ns, &[10, 20, 60]);
    let (start, end) = (Some(slices[0]), Some(slices[2]));
    let ns = namespace(&ns);

    let sum = registry.aggregate(Aggregation::Sum, "depth", &ns, start, end).unwrap();
    assert_eq!(sum.value.raw.as_f64(), Some(90.0));

    let avg = registry.aggregate(Aggregation::Average, "depth", &ns, start, end).unwrap();
    assert_eq!(avg.value.raw.as_f64(), Some(30.0));

    let min = registry.aggregate(Aggregation::Min, "depth", &ns, start, end).unwrap();
    assert_eq!(min.value.raw.as_f64(), Some(10.0));

    let max = registry.aggregate(Aggregation::Max, "depth", &ns, start, end).unwrap();
    assert_eq!(max.value.raw.as_f64(), Some(60.0));
    assert_eq!(max.value.unit, "count");
}

#[test]
fn test_aggregate_requires_exact_namespace() {
    let registry = Registry::new();
    let slices = fill_slices(&registry, "depth", &["Receiver", "Processor", "Queue"], &[5]);

    let err = registry
        .aggregate(Aggregation::Sum, "depth", &namespace(&["Receiver"]), Some(slices[0]), None)
        .unwrap_err();
    assert!(matches!(err, MetricsError::NoResults { .. }));
}

#[test]
fn test_aggregation_from_str() {
    assert_eq!("SUM".parse::<Aggregation>().unwrap(), Aggregation::Sum);
    assert_eq!("avg".parse::<Aggregation>().unwrap(), Aggregation::Average);
    assert!(matches!(
        "median".parse::<Aggregation>(),
        Err(MetricsError::UnsupportedAggregation(_))
    ));
}

// ============================================================================
// Discover
// ============================================================================

#[test]
fn test_discover_deduplicates_and_sorts() {
    let registry = Registry::new();
    fill_slices(&registry, "push_ctn", &["Receiver", "Defrag", "0", "Queue"], &[1, 2, 3]);
    fill_slices(&registry, "depth", &["Receiver", "Output", "Queue"], &[1, 2]);

    let found = registry.discover(&DiscoverFilter::default());

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].name, "depth");
    assert_eq!(found[1].name, "push_ctn");
    assert_eq!(found[1].value.raw.as_u64(), Some(0));
}

#[test]
fn test_discover_filters() {
    let registry = Registry::new();
    let slice = registry.new_time_slice(base_time(), INTERVAL);
    registry.add(
        slice,
        vec![
            metric("timed_out_buckets", &["Receiver", "Defrag", "0", "Queue"], 1, MetricKind::Counter),
            metric("total_buckets", &["Receiver", "Defrag", "0", "Queue"], 1, MetricKind::Gauge),
        ],
    );

    let by_kind = registry.discover(&DiscoverFilter {
        kind: Some(MetricKind::Counter),
        ..Default::default()
    });
    assert_eq!(by_kind.len(), 1);
    assert_eq!(by_kind[0].name, "timed_out_buckets");

    let by_name = registry.discover(&DiscoverFilter {
        name: Some("buckets".into()),
        ..Default::default()
    });
    assert_eq!(by_name.len(), 2);

    let by_unit = registry.discover(&DiscoverFilter {
        unit: Some("ns".into()),
        ..Default::default()
    });
    assert!(by_unit.is_empty());
}

// ============================================================================
// Prune
// ============================================================================

#[test]
fn test_prune_removes_old_slices() {
    let registry = Registry::new();
    fill_slices(&registry, "depth", &["Receiver"], &[1, 2, 3, 4, 5]);

    // Newest slice is base+40s; keep the last 20s worth
    let now = base_time() + TimeDelta::seconds(40);
    let removed = registry.prune(now, Duration::from_secs(20));

    assert_eq!(removed, 2);
    assert_eq!(registry.slice_count(), 3);
    let values: Vec<u64> = registry
        .search("depth", &[], None, None)
        .iter()
        .filter_map(|m| m.value.raw.as_u64())
        .collect();
    assert_eq!(values, vec![3, 4, 5]);
}
