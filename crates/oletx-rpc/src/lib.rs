//! RPC adapter between the oletx bridge and a coordinator proxy
//!
//! The bridge consumes the proxy through the synchronous
//! [`ProxyShimFactory`](oletx::ProxyShimFactory) traits. This crate carries
//! those calls over a small framed request/response protocol:
//!
//! ```text
//! ┌──────────────────────┐   TCP: 20-byte header + body   ┌─────────────────────┐
//! │ RpcProxyShimFactory  │ ─────────────────────────────► │ ProxyServer         │
//! │ RpcTransactionShim   │ ◄───────────────────────────── │   └─ ProxyService   │
//! │ RpcNativeTransaction │     response / fault PDUs      │      (coordinator)  │
//! └──────────────────────┘                                └─────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`pdu`]: PDU header and framing constants
//! - [`transport`]: Reading and writing whole PDUs over a byte stream
//! - [`protocol`]: Opnums and request/reply body encodings
//! - [`client`]: Blocking shim implementations for the bridge
//! - [`server`]: Async server hosting a [`ProxyService`]

pub mod client;
pub mod config;
pub mod error;
pub mod pdu;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{RpcChannel, RpcNativeTransaction, RpcProxyShimFactory, RpcTransactionShim};
pub use config::{RpcProxyConfig, DEFAULT_PORT};
pub use error::{Result, RpcError};
pub use pdu::{Pdu, PduHeader, PduType};
pub use protocol::{
    opnum, ConnectReply, NotificationRecord, ObjectId, ProxyRequest, ProxyResponse, ReceiveReply,
};
pub use server::{ProxyServer, ProxyService, ServerStats};
pub use transport::FrameTransport;
