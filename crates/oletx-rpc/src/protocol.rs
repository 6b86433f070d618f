//! Proxy operations and their body encodings
//!
//! Strings are a u32 length followed by UTF-8, blobs a u32 length followed
//! by raw bytes and GUIDs 16 bytes in COM layout. Objects living in the
//! proxy (resource managers, transaction shims, native transactions) are
//! named by u64 ids; 0 means "no object".

use bytes::{Buf, BufMut, Bytes, BytesMut};
use oletx::token::decode_guid;
use oletx::XactTransInfo;
use uuid::Uuid;

use crate::error::{Result, RpcError};

/// Operation numbers
pub mod opnum {
    pub const CONNECT_TO_PROXY: u16 = 0;
    pub const RECEIVE_TRANSACTION: u16 = 1;
    pub const GET_NOTIFICATION: u16 = 2;
    pub const RELEASE_NOTIFICATION_LOCK: u16 = 3;
    pub const TRANSACTION_COMMIT: u16 = 4;
    pub const TRANSACTION_ABORT: u16 = 5;
    pub const TRANSACTION_EXPORT: u16 = 6;
    pub const TRANSACTION_GET_NATIVE: u16 = 7;
    pub const TRANSACTION_GET_PROPAGATION_TOKEN: u16 = 8;
    pub const SHIM_RELEASE: u16 = 9;
    pub const NATIVE_COMMIT: u16 = 10;
    pub const NATIVE_ABORT: u16 = 11;
    pub const NATIVE_GET_TRANSACTION_INFO: u16 = 12;
}

/// Operation name for an opnum
pub fn operation_name(op: u16) -> &'static str {
    match op {
        opnum::CONNECT_TO_PROXY => "ConnectToProxy",
        opnum::RECEIVE_TRANSACTION => "ReceiveTransaction",
        opnum::GET_NOTIFICATION => "GetNotification",
        opnum::RELEASE_NOTIFICATION_LOCK => "ReleaseNotificationLock",
        opnum::TRANSACTION_COMMIT => "Commit",
        opnum::TRANSACTION_ABORT => "Abort",
        opnum::TRANSACTION_EXPORT => "Export",
        opnum::TRANSACTION_GET_NATIVE => "GetITransactionNative",
        opnum::TRANSACTION_GET_PROPAGATION_TOKEN => "GetPropagationToken",
        opnum::SHIM_RELEASE => "Release",
        opnum::NATIVE_COMMIT => "ITransaction::Commit",
        opnum::NATIVE_ABORT => "ITransaction::Abort",
        opnum::NATIVE_GET_TRANSACTION_INFO => "ITransaction::GetTransactionInfo",
        _ => "unknown operation",
    }
}

/// Id of an object held by the proxy
pub type ObjectId = u64;

/// Requests sent to the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRequest {
    ConnectToProxy {
        node_name: String,
        resource_manager_id: Uuid,
        managed_id: u32,
    },
    ReceiveTransaction {
        token: Vec<u8>,
        managed_id: u32,
    },
    GetNotification,
    ReleaseNotificationLock,
    TransactionCommit {
        shim: ObjectId,
    },
    TransactionAbort {
        shim: ObjectId,
    },
    TransactionExport {
        shim: ObjectId,
        whereabouts: Vec<u8>,
    },
    TransactionGetNative {
        shim: ObjectId,
    },
    TransactionGetPropagationToken {
        shim: ObjectId,
    },
    ShimRelease {
        object: ObjectId,
    },
    NativeCommit {
        native: ObjectId,
        retaining: bool,
        grf_tc: u32,
        grf_rm: u32,
    },
    NativeAbort {
        native: ObjectId,
        reason: Option<Uuid>,
        retaining: bool,
        asynchronous: bool,
    },
    NativeGetTransactionInfo {
        native: ObjectId,
    },
}

impl ProxyRequest {
    pub fn opnum(&self) -> u16 {
        match self {
            Self::ConnectToProxy { .. } => opnum::CONNECT_TO_PROXY,
            Self::ReceiveTransaction { .. } => opnum::RECEIVE_TRANSACTION,
            Self::GetNotification => opnum::GET_NOTIFICATION,
            Self::ReleaseNotificationLock => opnum::RELEASE_NOTIFICATION_LOCK,
            Self::TransactionCommit { .. } => opnum::TRANSACTION_COMMIT,
            Self::TransactionAbort { .. } => opnum::TRANSACTION_ABORT,
            Self::TransactionExport { .. } => opnum::TRANSACTION_EXPORT,
            Self::TransactionGetNative { .. } => opnum::TRANSACTION_GET_NATIVE,
            Self::TransactionGetPropagationToken { .. } => opnum::TRANSACTION_GET_PROPAGATION_TOKEN,
            Self::ShimRelease { .. } => opnum::SHIM_RELEASE,
            Self::NativeCommit { .. } => opnum::NATIVE_COMMIT,
            Self::NativeAbort { .. } => opnum::NATIVE_ABORT,
            Self::NativeGetTransactionInfo { .. } => opnum::NATIVE_GET_TRANSACTION_INFO,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::ConnectToProxy {
                node_name,
                resource_manager_id,
                managed_id,
            } => {
                put_string(&mut buf, node_name);
                put_guid(&mut buf, resource_manager_id);
                buf.put_u32_le(*managed_id);
            }
            Self::ReceiveTransaction { token, managed_id } => {
                put_blob(&mut buf, token);
                buf.put_u32_le(*managed_id);
            }
            Self::GetNotification | Self::ReleaseNotificationLock => {}
            Self::TransactionCommit { shim }
            | Self::TransactionAbort { shim }
            | Self::TransactionGetNative { shim }
            | Self::TransactionGetPropagationToken { shim } => buf.put_u64_le(*shim),
            Self::TransactionExport { shim, whereabouts } => {
                buf.put_u64_le(*shim);
                put_blob(&mut buf, whereabouts);
            }
            Self::ShimRelease { object } => buf.put_u64_le(*object),
            Self::NativeCommit {
                native,
                retaining,
                grf_tc,
                grf_rm,
            } => {
                buf.put_u64_le(*native);
                buf.put_u8(*retaining as u8);
                buf.put_u32_le(*grf_tc);
                buf.put_u32_le(*grf_rm);
            }
            Self::NativeAbort {
                native,
                reason,
                retaining,
                asynchronous,
            } => {
                buf.put_u64_le(*native);
                match reason {
                    Some(reason) => {
                        buf.put_u8(1);
                        put_guid(&mut buf, reason);
                    }
                    None => buf.put_u8(0),
                }
                buf.put_u8(*retaining as u8);
                buf.put_u8(*asynchronous as u8);
            }
            Self::NativeGetTransactionInfo { native } => buf.put_u64_le(*native),
        }
        buf.freeze()
    }

    pub fn decode(op: u16, mut body: &[u8]) -> Result<Self> {
        let buf = &mut body;
        let request = match op {
            opnum::CONNECT_TO_PROXY => Self::ConnectToProxy {
                node_name: get_string(buf)?,
                resource_manager_id: get_guid(buf)?,
                managed_id: get_u32(buf)?,
            },
            opnum::RECEIVE_TRANSACTION => Self::ReceiveTransaction {
                token: get_blob(buf)?,
                managed_id: get_u32(buf)?,
            },
            opnum::GET_NOTIFICATION => Self::GetNotification,
            opnum::RELEASE_NOTIFICATION_LOCK => Self::ReleaseNotificationLock,
            opnum::TRANSACTION_COMMIT => Self::TransactionCommit { shim: get_u64(buf)? },
            opnum::TRANSACTION_ABORT => Self::TransactionAbort { shim: get_u64(buf)? },
            opnum::TRANSACTION_EXPORT => Self::TransactionExport {
                shim: get_u64(buf)?,
                whereabouts: get_blob(buf)?,
            },
            opnum::TRANSACTION_GET_NATIVE => Self::TransactionGetNative { shim: get_u64(buf)? },
            opnum::TRANSACTION_GET_PROPAGATION_TOKEN => {
                Self::TransactionGetPropagationToken { shim: get_u64(buf)? }
            }
            opnum::SHIM_RELEASE => Self::ShimRelease { object: get_u64(buf)? },
            opnum::NATIVE_COMMIT => Self::NativeCommit {
                native: get_u64(buf)?,
                retaining: get_bool(buf)?,
                grf_tc: get_u32(buf)?,
                grf_rm: get_u32(buf)?,
            },
            opnum::NATIVE_ABORT => {
                let native = get_u64(buf)?;
                let reason = if get_bool(buf)? { Some(get_guid(buf)?) } else { None };
                Self::NativeAbort {
                    native,
                    reason,
                    retaining: get_bool(buf)?,
                    asynchronous: get_bool(buf)?,
                }
            }
            opnum::NATIVE_GET_TRANSACTION_INFO => Self::NativeGetTransactionInfo { native: get_u64(buf)? },
            op => return Err(RpcError::OperationUnavailable(op)),
        };
        Ok(request)
    }
}

/// Reply to `ConnectToProxy`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReply {
    pub node_name_matches: bool,
    pub whereabouts: Option<Vec<u8>>,
    pub resource_manager: ObjectId,
}

/// Reply to `ReceiveTransaction`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReply {
    pub transaction_id: Uuid,
    pub isolation_level: i32,
    pub shim: ObjectId,
}

/// Notification as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub handle: u32,
    pub kind: i32,
    pub is_single_phase: bool,
    pub aborting_hint: bool,
    pub release_required: bool,
    pub prepare_info: Option<Vec<u8>>,
}

/// Replies returned by the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyResponse {
    Connected(ConnectReply),
    Received(ReceiveReply),
    Notification(Option<NotificationRecord>),
    /// Operations without results
    Done,
    /// Export cookies and propagation tokens
    Blob(Vec<u8>),
    /// Native transaction objects
    Object(ObjectId),
    TransactionInfo(XactTransInfo),
}

impl ProxyResponse {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::Connected(reply) => {
                buf.put_u8(reply.node_name_matches as u8);
                put_optional_blob(&mut buf, reply.whereabouts.as_deref());
                buf.put_u64_le(reply.resource_manager);
            }
            Self::Received(reply) => {
                put_guid(&mut buf, &reply.transaction_id);
                buf.put_i32_le(reply.isolation_level);
                buf.put_u64_le(reply.shim);
            }
            Self::Notification(None) => buf.put_u8(0),
            Self::Notification(Some(record)) => {
                buf.put_u8(1);
                buf.put_u32_le(record.handle);
                buf.put_i32_le(record.kind);
                buf.put_u8(record.is_single_phase as u8);
                buf.put_u8(record.aborting_hint as u8);
                buf.put_u8(record.release_required as u8);
                put_optional_blob(&mut buf, record.prepare_info.as_deref());
            }
            Self::Done => {}
            Self::Blob(data) => put_blob(&mut buf, data),
            Self::Object(id) => buf.put_u64_le(*id),
            Self::TransactionInfo(info) => {
                put_guid(&mut buf, &info.uow);
                buf.put_i32_le(info.iso_level);
                buf.put_u32_le(info.iso_flags);
                buf.put_u32_le(info.grf_tc_supported);
                buf.put_u32_le(info.grf_rm_supported);
                buf.put_u32_le(info.grf_tc_supported_retaining);
                buf.put_u32_le(info.grf_rm_supported_retaining);
            }
        }
        buf.freeze()
    }

    /// Decode the reply to operation `op`
    pub fn decode(op: u16, mut body: &[u8]) -> Result<Self> {
        let buf = &mut body;
        let response = match op {
            opnum::CONNECT_TO_PROXY => Self::Connected(ConnectReply {
                node_name_matches: get_bool(buf)?,
                whereabouts: get_optional_blob(buf)?,
                resource_manager: get_u64(buf)?,
            }),
            opnum::RECEIVE_TRANSACTION => Self::Received(ReceiveReply {
                transaction_id: get_guid(buf)?,
                isolation_level: get_i32(buf)?,
                shim: get_u64(buf)?,
            }),
            opnum::GET_NOTIFICATION => {
                if !get_bool(buf)? {
                    Self::Notification(None)
                } else {
                    Self::Notification(Some(NotificationRecord {
                        handle: get_u32(buf)?,
                        kind: get_i32(buf)?,
                        is_single_phase: get_bool(buf)?,
                        aborting_hint: get_bool(buf)?,
                        release_required: get_bool(buf)?,
                        prepare_info: get_optional_blob(buf)?,
                    }))
                }
            }
            opnum::RELEASE_NOTIFICATION_LOCK
            | opnum::TRANSACTION_COMMIT
            | opnum::TRANSACTION_ABORT
            | opnum::SHIM_RELEASE
            | opnum::NATIVE_COMMIT
            | opnum::NATIVE_ABORT => Self::Done,
            opnum::TRANSACTION_EXPORT | opnum::TRANSACTION_GET_PROPAGATION_TOKEN => Self::Blob(get_blob(buf)?),
            opnum::TRANSACTION_GET_NATIVE => Self::Object(get_u64(buf)?),
            opnum::NATIVE_GET_TRANSACTION_INFO => Self::TransactionInfo(XactTransInfo {
                uow: get_guid(buf)?,
                iso_level: get_i32(buf)?,
                iso_flags: get_u32(buf)?,
                grf_tc_supported: get_u32(buf)?,
                grf_rm_supported: get_u32(buf)?,
                grf_tc_supported_retaining: get_u32(buf)?,
                grf_rm_supported_retaining: get_u32(buf)?,
            }),
            op => return Err(RpcError::OperationUnavailable(op)),
        };
        Ok(response)
    }
}

fn ensure(buf: &[u8], needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(RpcError::BufferUnderflow {
            needed,
            have: buf.remaining(),
        });
    }
    Ok(())
}

fn get_bool(buf: &mut &[u8]) -> Result<bool> {
    ensure(buf, 1)?;
    Ok(buf.get_u8() != 0)
}

fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn get_i32(buf: &mut &[u8]) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32_le())
}

fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64_le())
}

fn get_guid(buf: &mut &[u8]) -> Result<Uuid> {
    ensure(buf, 16)?;
    Ok(decode_guid(buf))
}

fn get_blob(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    let data = buf[..len].to_vec();
    buf.advance(len);
    Ok(data)
}

fn get_optional_blob(buf: &mut &[u8]) -> Result<Option<Vec<u8>>> {
    if get_bool(buf)? {
        get_blob(buf).map(Some)
    } else {
        Ok(None)
    }
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    String::from_utf8(get_blob(buf)?).map_err(|e| RpcError::InvalidPdu(format!("invalid UTF-8 string: {}", e)))
}

fn put_blob(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

fn put_optional_blob(buf: &mut BytesMut, data: Option<&[u8]>) {
    match data {
        Some(data) => {
            buf.put_u8(1);
            put_blob(buf, data);
        }
        None => buf.put_u8(0),
    }
}

fn put_string(buf: &mut BytesMut, value: &str) {
    put_blob(buf, value.as_bytes());
}

fn put_guid(buf: &mut BytesMut, guid: &Uuid) {
    buf.put_slice(&guid.to_bytes_le());
}
