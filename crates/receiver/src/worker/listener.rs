//! UDP listener
//!
//! Every listener binds its own socket to the shared address with
//! `SO_REUSEPORT`, so the kernel spreads datagrams across instances. A
//! listener only copies and pre-validates; decoding happens in the
//! processor stage.

use std::io;
use std::mem::size_of;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use sdsyslog_metrics::{Counter, Metric, MetricKind, MetricsProvider};
use sdsyslog_queue::Queue;

use super::{ElapsedStats, guarded_sync};
use crate::error::{ReceiverError, Result};
use crate::namespace;

/// Receive buffer multiplier applied to the configured datagram size
const UDP_BUFFER_MULTIPLIER: usize = 4;

/// A datagram on its way to the processor stage
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub data: Bytes,
    pub remote_ip: IpAddr,
    pub received_at: Instant,
}

impl RawPacket {
    /// Estimated in-memory size, for queue byte accounting
    pub fn size(&self) -> u64 {
        (size_of::<Self>() + self.data.len()) as u64
    }
}

/// Create a non-blocking UDP socket with `SO_REUSEADDR` and `SO_REUSEPORT`.
///
/// IPv6 sockets also accept IPv4 traffic. The kernel receive buffer is sized
/// for bursts of `datagram_size` packets; failure to resize it is logged and
/// otherwise ignored.
pub fn bind_udp(addr: SocketAddr, datagram_size: usize) -> Result<UdpSocket> {
    let bind_err = |source: io::Error| ReceiverError::Bind {
        address: addr.to_string(),
        source,
    };

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;

    socket.set_reuse_address(true).map_err(bind_err)?;
    #[cfg(unix)]
    socket.set_reuse_port(true).map_err(bind_err)?;

    if addr.is_ipv6() {
        socket.set_only_v6(false).map_err(bind_err)?;
    }

    let recv_buffer_size = datagram_size * UDP_BUFFER_MULTIPLIER;
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer_size) {
        warn!(error = %e, requested_size = recv_buffer_size, "failed to set UDP SO_RCVBUF");
    }

    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(bind_err)
}

/// Listener counters
#[derive(Debug, Default)]
pub struct ListenerMetrics {
    pub valid_packets: Counter,
    /// Shorter than the minimum packet length
    pub invalid_packets: Counter,
    /// Dropped because the processor queue was full
    pub dropped_packets: Counter,
    /// Time spent handling packets, excluding waits on the socket
    pub busy_ns: Counter,
    pub elapsed: ElapsedStats,
}

/// One UDP socket feeding the processor queue
pub struct Listener {
    namespace: Vec<String>,
    socket: UdpSocket,
    outbox: Arc<Queue<RawPacket>>,
    buffer_size: usize,
    min_packet_len: usize,
    metrics: ListenerMetrics,
}

impl Listener {
    pub fn new(
        prefix: &[String],
        socket: UdpSocket,
        outbox: Arc<Queue<RawPacket>>,
        buffer_size: usize,
        min_packet_len: usize,
    ) -> Self {
        Self {
            namespace: namespace::child(prefix, namespace::LISTENER),
            socket,
            outbox,
            buffer_size,
            min_packet_len,
            metrics: ListenerMetrics::default(),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn metrics(&self) -> &ListenerMetrics {
        &self.metrics
    }

    /// Receive until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut buf = vec![0u8; self.buffer_size];
        debug!(namespace = %self.namespace.join("/"), "listener started");

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            let result = received
                .map_err(ReceiverError::Receive)
                .and_then(|(len, peer)| guarded_sync(|| self.handle(&buf[..len], peer)));
            if let Err(e) = result {
                error!(namespace = %self.namespace.join("/"), error = %e, "listener iteration failed");
            }
        }

        debug!(namespace = %self.namespace.join("/"), "listener stopped");
    }

    fn handle(&self, data: &[u8], peer: SocketAddr) -> Result<()> {
        let start = Instant::now();

        if data.len() < self.min_packet_len {
            self.metrics.invalid_packets.inc();
            debug!(peer = %peer, len = data.len(), "packet shorter than minimum length");
        } else {
            let packet = RawPacket {
                data: Bytes::copy_from_slice(data),
                remote_ip: peer.ip().to_canonical(),
                received_at: start,
            };
            let size = packet.size();

            match self.outbox.push(packet) {
                Ok(()) => {
                    self.outbox.record_bytes(size);
                    self.metrics.valid_packets.inc();
                    self.metrics.elapsed.record(start);
                }
                Err(_) => {
                    self.metrics.dropped_packets.inc();
                    debug!(peer = %peer, "processor queue full, dropping packet");
                }
            }
        }

        self.metrics.busy_ns.add(crate::nanos(start.elapsed()));
        Ok(())
    }
}

impl MetricsProvider for Listener {
    fn collect_metrics(&self, interval: Duration) -> Vec<Metric> {
        let ns = &self.namespace;
        let valid = self.metrics.valid_packets.take();
        let busy_ns = self.metrics.busy_ns.take();
        let (avg_ns, max_ns) = self.metrics.elapsed.take(valid);

        let interval_ns = interval.as_nanos() as f64;
        let busy_percent = if interval_ns > 0.0 {
            busy_ns as f64 / interval_ns * 100.0
        } else {
            0.0
        };

        vec![
            Metric::new("valid_packets", "Packets queued for processing", ns, MetricKind::Counter, valid, "count", interval),
            Metric::new(
                "invalid_packets",
                "Packets rejected by pre-validation",
                ns,
                MetricKind::Counter,
                self.metrics.invalid_packets.take(),
                "count",
                interval,
            ),
            Metric::new(
                "dropped_packets",
                "Packets dropped on a full processor queue",
                ns,
                MetricKind::Counter,
                self.metrics.dropped_packets.take(),
                "count",
                interval,
            ),
            Metric::new(
                "busy_time_percent",
                "Share of the interval spent handling packets",
                ns,
                MetricKind::Summary,
                busy_percent,
                "percent",
                interval,
            ),
            Metric::new("average_process_ns", "Average time to queue a packet", ns, MetricKind::Summary, avg_ns, "ns", interval),
            Metric::new("max_process_ns", "Longest time to queue a packet", ns, MetricKind::Summary, max_ns, "ns", interval),
        ]
    }
}
