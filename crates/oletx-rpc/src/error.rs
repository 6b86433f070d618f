//! Error types for the proxy RPC adapter

use oletx::OletxError;
use thiserror::Error;

/// RPC adapter errors
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("invalid PDU: {0}")]
    InvalidPdu(String),

    #[error("unknown PDU type: {0}")]
    UnknownPduType(u8),

    #[error("buffer underflow: need {needed} bytes, have {have}")]
    BufferUnderflow { needed: usize, have: usize },

    #[error("operation unavailable: {0}")]
    OperationUnavailable(u16),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,

    #[error("fault: status 0x{0:08x}")]
    Fault(u32),

    #[error("call ID mismatch: expected {expected}, got {got}")]
    CallIdMismatch { expected: u32, got: u32 },

    #[error("PDU too large: {size} bytes exceeds maximum {max}")]
    PduTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, RpcError>;

impl From<RpcError> for OletxError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Fault(hresult) => OletxError::Proxy {
                operation: "proxy call",
                hresult,
            },
            err => OletxError::Transport(err.to_string()),
        }
    }
}
