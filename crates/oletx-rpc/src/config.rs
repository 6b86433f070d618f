//! Adapter configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::transport::DEFAULT_MAX_PDU_SIZE;

/// Default port of the coordinator proxy endpoint
pub const DEFAULT_PORT: u16 = 3372;

/// Client configuration for reaching the coordinator proxy
#[derive(Debug, Clone)]
pub struct RpcProxyConfig {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    /// Upper bound for one request/response exchange
    pub call_timeout: Duration,
    pub max_pdu_size: usize,
}

impl Default for RpcProxyConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
        }
    }
}

impl RpcProxyConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Self::default()
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn max_pdu_size(mut self, size: usize) -> Self {
        self.max_pdu_size = size;
        self
    }
}
