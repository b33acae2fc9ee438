//! End-to-end tests: datagrams in over UDP, reassembled lines out of a sink

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::net::UdpSocket;

use sdsyslog_config::ReceiverConfig;
use sdsyslog_protocol::{JsonCodec, MISSING_FRAGMENT, Payload, fragment};
use sdsyslog_receiver::worker::MessageSink;
use sdsyslog_receiver::{Daemon, Result};

/// Keeps every written line in memory
#[derive(Clone, Default)]
struct CaptureSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CaptureSink {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    async fn wait_for(&self, count: usize) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let lines = self.lines();
                if lines.len() >= count {
                    return lines;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("messages did not reach the sink")
    }
}

impl MessageSink for CaptureSink {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn write(&mut self, message: &Payload) -> Result<()> {
        self.lines.lock().push(message.format_text());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

fn config() -> ReceiverConfig {
    let mut config = ReceiverConfig::default();
    config.network.address = "127.0.0.1".into();
    config.network.port = 0;
    config.autoscaling.enabled = false;
    config.autoscaling.min_listeners = 1;
    config.autoscaling.max_listeners = 1;
    config.autoscaling.min_processors = 1;
    config.autoscaling.max_processors = 1;
    config.autoscaling.min_assemblers = 2;
    config.autoscaling.max_assemblers = 2;
    config.defrag.packet_deadline = Duration::from_millis(100);
    config.defrag.watcher_interval = Duration::from_millis(10);
    config
}

fn message(log_id: u32, text: &'static str) -> Payload {
    Payload {
        host_id: 11,
        log_id,
        timestamp: Utc::now(),
        hostname: "web01".into(),
        application_name: "nginx".into(),
        process_id: 4242,
        facility: "daemon".into(),
        severity: "info".into(),
        log_text: Bytes::from_static(text.as_bytes()),
        ..Default::default()
    }
}

async fn start(sink: &CaptureSink) -> Daemon {
    Daemon::start(config(), Arc::new(JsonCodec), vec![Box::new(sink.clone())])
        .await
        .unwrap()
}

async fn send(daemon: &Daemon, fragments: &[Payload]) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for f in fragments {
        let datagram = JsonCodec.encode(f).unwrap();
        socket.send_to(&datagram, daemon.local_addr()).await.unwrap();
    }
}

#[tokio::test]
async fn test_out_of_order_fragments_reassemble() {
    let sink = CaptureSink::default();
    let daemon = start(&sink).await;

    let whole = message(1, "the quick brown fox jumps over the lazy dog");
    let mut fragments = fragment(&whole, 8).unwrap();
    fragments.reverse();
    send(&daemon, &fragments).await;

    let lines = sink.wait_for(1).await;
    assert_eq!(lines, vec![whole.format_text()]);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_missing_fragment_is_filled_after_deadline() {
    let sink = CaptureSink::default();
    let daemon = start(&sink).await;

    let whole = message(2, "aaaabbbbcccc");
    let fragments = fragment(&whole, 4).unwrap();
    send(&daemon, &[fragments[0].clone(), fragments[2].clone()]).await;

    let lines = sink.wait_for(1).await;
    assert!(lines[0].ends_with(&format!("aaaa{MISSING_FRAGMENT}cccc")));

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_interleaved_messages_stay_apart() {
    let sink = CaptureSink::default();
    let daemon = start(&sink).await;

    let first = message(3, "first message body");
    let second = message(4, "second message body");
    let a = fragment(&first, 5).unwrap();
    let b = fragment(&second, 5).unwrap();
    let interleaved: Vec<Payload> = a.iter().zip(b.iter()).flat_map(|(x, y)| [y.clone(), x.clone()]).collect();
    send(&daemon, &interleaved).await;

    let mut lines = sink.wait_for(2).await;
    lines.sort();
    let mut expected = vec![first.format_text(), second.format_text()];
    expected.sort();
    assert_eq!(lines, expected);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_garbage_datagrams_are_ignored() {
    let sink = CaptureSink::default();
    let daemon = start(&sink).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(b"not json", daemon.local_addr()).await.unwrap();
    let whole = message(5, "still delivered");
    send(&daemon, &fragment(&whole, 64).unwrap()).await;

    let lines = sink.wait_for(1).await;
    assert_eq!(lines, vec![whole.format_text()]);

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_delivers_pending_message() {
    let sink = CaptureSink::default();
    let daemon = start(&sink).await;

    let whole = message(6, "sent just before shutdown");
    let fragments = fragment(&whole, 10).unwrap();
    // Last fragment withheld; only the deadline can complete the bucket
    send(&daemon, &fragments[..fragments.len() - 1]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    daemon.shutdown().await;

    let lines = sink.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with(MISSING_FRAGMENT));
}

#[tokio::test]
async fn test_start_fails_on_invalid_queue_bounds() {
    let mut config = config();
    config.autoscaling.min_output_queue = 3;

    let result = Daemon::start(config, Arc::new(JsonCodec), vec![Box::new(CaptureSink::default())]).await;
    assert!(result.is_err());
}
