//! Metric namespaces for receiver components
//!
//! ```text
//! Receiver/Ingest/{id}/Listener
//! Receiver/Processor/Queue
//! Receiver/Processor/{id}/Worker
//! Receiver/Defrag/{id}/Queue
//! Receiver/Defrag/{id}/Assembler
//! Receiver/Output/Queue
//! Receiver/Output/Worker
//! ```

pub const RECEIVER: &str = "Receiver";
pub const INGEST: &str = "Ingest";
pub const PROCESSOR: &str = "Processor";
pub const DEFRAG: &str = "Defrag";
pub const OUTPUT: &str = "Output";

pub const LISTENER: &str = "Listener";
pub const QUEUE: &str = "Queue";
pub const WORKER: &str = "Worker";
pub const ASSEMBLER: &str = "Assembler";

fn path(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}

/// `Receiver/Ingest/{id}`
pub fn ingest_instance(id: usize) -> Vec<String> {
    path(&[RECEIVER, INGEST, id.to_string().as_str()])
}

pub fn processor_queue() -> Vec<String> {
    path(&[RECEIVER, PROCESSOR, QUEUE])
}

/// `Receiver/Processor/{id}`
pub fn processor_instance(id: usize) -> Vec<String> {
    path(&[RECEIVER, PROCESSOR, id.to_string().as_str()])
}

/// `Receiver/Defrag/{id}`, shared by a shard and its assembler
pub fn defrag_pair(id: usize) -> Vec<String> {
    path(&[RECEIVER, DEFRAG, id.to_string().as_str()])
}

pub fn output_queue() -> Vec<String> {
    path(&[RECEIVER, OUTPUT, QUEUE])
}

pub fn output_worker() -> Vec<String> {
    path(&[RECEIVER, OUTPUT, WORKER])
}

/// `prefix` with one more segment
pub fn child(prefix: &[String], segment: &str) -> Vec<String> {
    let mut ns = prefix.to_vec();
    ns.push(segment.to_string());
    ns
}
