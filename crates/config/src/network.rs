//! Listener socket settings

use serde::Deserialize;

/// `[network]` section
///
/// ```toml
/// [network]
/// address = "0.0.0.0"
/// port = 8514
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bind address; "::" accepts IPv4 and IPv6 on dual-stack hosts
    pub address: String,

    pub port: u16,

    /// Receive buffer per listener, also the largest datagram accepted
    pub buffer_size: usize,

    /// Datagrams shorter than this are counted invalid without decoding
    pub min_packet_len: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "::".into(),
            port: 8514,
            buffer_size: 65535,
            min_packet_len: 16,
        }
    }
}

impl NetworkConfig {
    /// `address:port`, bracketing IPv6 literals
    pub fn bind_addr(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}
