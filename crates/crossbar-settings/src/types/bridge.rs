//! UDP side channel settings.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Addresses and limits for the worker bridge.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Where bridge requests are sent.
    pub worker_addr: String,
    /// Where worker responses are received.
    pub listen_addr: String,
    /// Upper bound on a single outbound send.
    pub send_timeout_ms: u64,
    /// Receive buffer size; longer datagrams are truncated by the OS.
    pub max_datagram_size: usize,
    /// Value of the `type` field that marks a message for the worker.
    pub request_marker: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            worker_addr: "127.0.0.1:8080".to_string(),
            listen_addr: "127.0.0.1:8081".to_string(),
            send_timeout_ms: 1000,
            max_datagram_size: 4096,
            request_marker: "POST".to_string(),
        }
    }
}

impl BridgeSettings {
    /// Parsed [`Self::worker_addr`].
    pub fn worker_socket_addr(&self) -> Result<SocketAddr> {
        parse_addr("bridge.workerAddr", &self.worker_addr)
    }

    /// Parsed [`Self::listen_addr`].
    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        parse_addr("bridge.listenAddr", &self.listen_addr)
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr> {
    value.parse().map_err(|source| SettingsError::InvalidAddress {
        field,
        value: value.to_string(),
        source,
    })
}
