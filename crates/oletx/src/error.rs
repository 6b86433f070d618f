//! Bridge error types

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, OletxError>;

/// Errors raised while promoting or propagating a distributed transaction
#[derive(Error, Debug)]
pub enum OletxError {
    /// Session establishment with the coordinator proxy failed
    #[error("failed to connect to the transaction manager proxy: {0}")]
    ProxyConnect(String),

    /// Pull propagation of a propagation token failed
    #[error("failed to receive the distributed transaction from the propagation token: {0}")]
    TransactionImport(String),

    /// Push propagation toward a target coordinator failed
    #[error("failed to export the distributed transaction: {0}")]
    TransactionExport(String),

    /// Retrieving the native transaction object failed
    #[error("failed to retrieve the native transaction: {0}")]
    NativeTransaction(String),

    /// Propagation token is shorter than its fixed header
    #[error("malformed propagation token: need {needed} bytes, have {have}")]
    MalformedToken { needed: usize, have: usize },

    /// A proxy call completed with a failure status
    #[error("{operation} failed with status 0x{hresult:08x}")]
    Proxy { operation: &'static str, hresult: u32 },

    /// The adapter could not reach the proxy
    #[error("proxy transport error: {0}")]
    Transport(String),

    /// The bridge configuration cannot be used
    #[error("invalid bridge configuration: {0}")]
    InvalidConfig(String),

    /// The host transaction was dropped while a notification still referenced it
    #[error("transaction is no longer alive")]
    TransactionDisposed,

    /// Host-visible promotion or enlistment failure
    #[error("could not promote or enlist the transaction: {0}")]
    Promotion(#[source] Box<OletxError>),
}

impl OletxError {
    /// Wrap an error as a promotion failure, leaving existing wrappers alone
    pub fn promotion(self) -> Self {
        match self {
            err @ OletxError::Promotion(_) => err,
            err => OletxError::Promotion(Box::new(err)),
        }
    }

    /// The innermost error, looking through promotion wrappers
    pub fn cause(&self) -> &OletxError {
        match self {
            OletxError::Promotion(inner) => inner.cause(),
            err => err,
        }
    }
}

/// Status codes reported by the coordinator proxy
pub mod hresult {
    /// Operation successful
    pub const S_OK: u32 = 0x00000000;
    /// Unspecified error
    pub const E_FAIL: u32 = 0x80004005;
    /// Invalid argument
    pub const E_INVALIDARG: u32 = 0x80070057;
    /// Transaction has already been committed or aborted
    pub const XACT_E_NOTRANSACTION: u32 = 0x8004D00E;
    /// Transaction manager is not available
    pub const XACT_E_TMNOTAVAILABLE: u32 = 0x8004D01B;
    /// Connection to the transaction manager went down
    pub const XACT_E_CONNECTION_DOWN: u32 = 0x8004D01C;
    /// Transaction was aborted
    pub const XACT_E_ABORTED: u32 = 0x8004D019;
}
