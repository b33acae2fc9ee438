//! Configuration validation
//!
//! Validates config consistency:
//! - Every min is at most its max
//! - Instance minimums are at least one
//! - Queue bounds are powers of two of at least 2
//! - The initial packet deadline lies inside its bounds
//! - Intervals and sizes are non-zero

use std::time::Duration;

use crate::ReceiverConfig;
use crate::error::{ConfigError, Result};

/// Validate the entire configuration
pub fn validate_config(config: &ReceiverConfig) -> Result<()> {
    validate_network(config)?;
    validate_autoscaling(config)?;
    validate_defrag(config)?;
    validate_intervals(config)?;
    Ok(())
}

fn validate_network(config: &ReceiverConfig) -> Result<()> {
    let net = &config.network;
    if net.buffer_size == 0 {
        return Err(ConfigError::invalid_value("network", "buffer_size", "must be non-zero"));
    }
    if net.min_packet_len > net.buffer_size {
        return Err(ConfigError::inverted_bounds(
            "network",
            "min_packet_len",
            "buffer_size",
            net.min_packet_len,
            net.buffer_size,
        ));
    }
    Ok(())
}

fn validate_autoscaling(config: &ReceiverConfig) -> Result<()> {
    let a = &config.autoscaling;

    for (min_field, max_field, min, max) in [
        ("min_listeners", "max_listeners", a.min_listeners, a.max_listeners),
        ("min_processors", "max_processors", a.min_processors, a.max_processors),
        ("min_assemblers", "max_assemblers", a.min_assemblers, a.max_assemblers),
    ] {
        if min == 0 {
            return Err(ConfigError::invalid_value("autoscaling", min_field, "must be at least 1"));
        }
        if min > max {
            return Err(ConfigError::inverted_bounds("autoscaling", min_field, max_field, min, max));
        }
    }

    for (min_field, max_field, min, max) in [
        ("min_processor_queue", "max_processor_queue", a.min_processor_queue, a.max_processor_queue),
        ("min_output_queue", "max_output_queue", a.min_output_queue, a.max_output_queue),
    ] {
        for (field, value) in [(min_field, min), (max_field, max)] {
            if value < 2 || !value.is_power_of_two() {
                return Err(ConfigError::invalid_value(
                    "autoscaling",
                    field,
                    format!("{value} is not a power of two of at least 2"),
                ));
            }
        }
        if min > max {
            return Err(ConfigError::inverted_bounds("autoscaling", min_field, max_field, min, max));
        }
    }

    if a.shard_buffer == 0 {
        return Err(ConfigError::invalid_value("autoscaling", "shard_buffer", "must be non-zero"));
    }
    Ok(())
}

fn validate_defrag(config: &ReceiverConfig) -> Result<()> {
    let d = &config.defrag;
    if d.min_packet_deadline > d.max_packet_deadline {
        return Err(ConfigError::inverted_bounds(
            "defrag",
            "min_packet_deadline",
            "max_packet_deadline",
            format!("{:?}", d.min_packet_deadline),
            format!("{:?}", d.max_packet_deadline),
        ));
    }
    if d.packet_deadline < d.min_packet_deadline || d.packet_deadline > d.max_packet_deadline {
        return Err(ConfigError::invalid_value(
            "defrag",
            "packet_deadline",
            format!(
                "{:?} is outside {:?}..={:?}",
                d.packet_deadline, d.min_packet_deadline, d.max_packet_deadline
            ),
        ));
    }
    Ok(())
}

fn validate_intervals(config: &ReceiverConfig) -> Result<()> {
    let intervals: [(&'static str, &'static str, Duration); 6] = [
        ("autoscaling", "poll_interval", config.autoscaling.poll_interval),
        ("defrag", "packet_deadline", config.defrag.packet_deadline),
        ("defrag", "watcher_interval", config.defrag.watcher_interval),
        ("metrics", "interval", config.metrics.interval),
        ("metrics", "max_age", config.metrics.max_age),
        ("output", "flush_interval", config.output.flush_interval),
    ];
    for (section, field, value) in intervals {
        if value.is_zero() {
            return Err(ConfigError::invalid_value(section, field, "must be non-zero"));
        }
    }
    Ok(())
}
