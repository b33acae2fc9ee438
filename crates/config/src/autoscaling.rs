//! Autoscaler bounds
//!
//! Instance counts default to one per CPU at most. Queue bounds must be
//! powers of two since queues only ever double or halve.

use std::time::Duration;

use serde::Deserialize;

/// `[autoscaling]` section
///
/// ```toml
/// [autoscaling]
/// enabled = true
/// poll_interval = "5s"
/// max_processors = 8
/// max_output_queue = 16384
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoscalingConfig {
    pub enabled: bool,

    /// Time between scaling decisions
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    pub min_listeners: usize,
    pub max_listeners: usize,
    pub min_processors: usize,
    pub max_processors: usize,
    /// Each assembler is paired with one shard
    pub min_assemblers: usize,
    pub max_assemblers: usize,

    pub min_processor_queue: usize,
    pub max_processor_queue: usize,
    pub min_output_queue: usize,
    pub max_output_queue: usize,

    /// Ready-key channel capacity per shard
    pub shard_buffer: usize,
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        let cpus = num_cpus();
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(5),
            min_listeners: 1,
            max_listeners: cpus,
            min_processors: 1,
            max_processors: cpus,
            min_assemblers: 1,
            max_assemblers: cpus,
            min_processor_queue: 512,
            max_processor_queue: 4096,
            min_output_queue: 512,
            max_output_queue: 4096,
            shard_buffer: 1024,
        }
    }
}

impl AutoscalingConfig {
    /// Pull minimum instance counts down to the CPU count
    pub(crate) fn clamp_minimums(&mut self, cpus: usize) {
        self.min_listeners = self.min_listeners.min(cpus);
        self.min_processors = self.min_processors.min(cpus);
        self.min_assemblers = self.min_assemblers.min(cpus);
    }
}

/// Number of available CPUs, 4 if detection fails
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
