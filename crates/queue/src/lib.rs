//! SDSyslog - Queue
//!
//! Bounded multi-producer multi-consumer queue whose capacity can be changed
//! while producers and consumers keep running.
//!
//! # Overview
//!
//! - [`Queue::push`] never blocks and hands the value back in [`Full`] when
//!   there is no room
//! - [`Queue::pop`] waits for an item or for cancellation
//! - [`Queue::mutate_size`] publishes a new ring for producers while
//!   consumers finish the old one, preserving FIFO order across the switch
//! - [`Queue::scale_capacity`] and [`trend`] decide when to do that
//!
//! # Example
//!
//! ```
//! use sdsyslog_queue::Queue;
//!
//! let queue = Queue::new(4).unwrap();
//! queue.push("a").unwrap();
//! queue.mutate_size(8).unwrap();
//! queue.push("b").unwrap();
//!
//! assert_eq!(queue.try_pop(), Some("a"));
//! assert_eq!(queue.try_pop(), Some("b"));
//! assert_eq!(queue.capacity(), 8);
//! ```

mod error;
mod metrics;
mod queue;
mod ring;
mod scaling;

pub use error::{Full, QueueError, Result};
pub use metrics::QueueMetrics;
pub use queue::{DEFAULT_MAX_CAPACITY, DEFAULT_MIN_CAPACITY, Queue};
pub use scaling::{available_memory, next_power_of_two, prev_power_of_two, trend};
