//! Distributed transaction propagation bridge
//!
//! Lets a host transaction runtime promote its local transactions to an
//! external two-phase-commit coordinator reached through a proxy, and
//! propagate them onward (push via export cookies, pull via propagation
//! tokens).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Host transaction runtime (caller)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  InterceptionRegistry  ──►  PromotionInterceptor            │
//! │  - enlist promotable        - marker swap                   │
//! │  - export cookie            - DelegatedNotification         │
//! │  - native transaction                                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TransactionManager (facade)   │  Token codec               │
//! │  - whereabouts                 │  - 24-byte header          │
//! │  - export cookie / native tx   │  - transaction id @ 8      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ProxySession  ──  HandleTable (handle → managed object)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │        ProxyShimFactory (in-process, or oletx-rpc)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handle_table`]: Opaque 32-bit handles for objects the proxy calls back about
//! - [`token`]: Propagation token header and transaction identifier extraction
//! - [`shim`]: Proxy-side capabilities the bridge consumes
//! - [`session`]: Lazily connected proxy session, import/export, notifications
//! - [`manager`]: Export-cookie and native-transaction facade
//! - [`interceptor`]: Entry-point registry and the promotion interceptor
//! - [`bridge`]: Assembly of the above for one process

pub mod bridge;
pub mod config;
pub mod error;
pub mod handle_table;
pub mod interceptor;
pub mod manager;
pub mod session;
pub mod shim;
pub mod token;

#[cfg(test)]
mod testing;

pub use bridge::OletxBridge;
pub use config::BridgeConfig;
pub use error::{hresult, OletxError, Result};
pub use handle_table::{Handle, HandleTable};
pub use interceptor::{
    EntryPoint, HostTransaction, InterceptionRegistry, PromotableEnlistment, PromotableNotification,
    PromoterType, PromotionInterceptor, SinglePhaseEnlistment, TransactionInterceptor,
};
pub use manager::TransactionManager;
pub use session::{ImportedTransaction, OutcomeEnlistment, ProxySession};
pub use shim::{
    IsolationLevel, NativeTransaction, NotificationKind, ProxyConnection, ProxyShimFactory,
    ReceivedTransaction, ResourceManagerShim, ShimBuffer, ShimNotification, TransactionOutcome,
    TransactionShim, XactTransInfo,
};
pub use token::{extract_transaction_id, TokenHeader};
