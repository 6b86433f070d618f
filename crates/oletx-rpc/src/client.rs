//! Proxy RPC client
//!
//! Implements the bridge's proxy shim traits over a TCP connection to a
//! [`ProxyServer`](crate::server::ProxyServer). The bridge calls the shims
//! synchronously, so the client drives its socket on a private
//! current-thread runtime and blocks each call on one request/response
//! exchange. None of these types may be used from inside an async task.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use oletx::{
    Handle, IsolationLevel, NativeTransaction, NotificationKind, OletxError, ProxyConnection,
    ProxyShimFactory, ReceivedTransaction, ResourceManagerShim, ShimBuffer, ShimNotification,
    TransactionShim, XactTransInfo,
};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::RpcProxyConfig;
use crate::error::{Result, RpcError};
use crate::pdu::{Pdu, PduHeader, PduType};
use crate::protocol::{operation_name, ObjectId, ProxyRequest, ProxyResponse};
use crate::transport::FrameTransport;

/// One connection to the proxy, shared by every shim created over it
pub struct RpcChannel {
    runtime: Runtime,
    transport: Mutex<Option<FrameTransport<TcpStream>>>,
    call_id_counter: AtomicU32,
    call_timeout: Duration,
    addr: SocketAddr,
}

impl RpcChannel {
    /// Open the connection described by `config`
    pub fn connect(config: &RpcProxyConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let stream = runtime.block_on(async {
            match timeout(config.connect_timeout, TcpStream::connect(config.addr)).await {
                Ok(stream) => stream.map_err(RpcError::from),
                Err(_) => Err(RpcError::Timeout),
            }
        })?;
        stream.set_nodelay(true)?;
        debug!("Connected to transaction manager proxy at {}", config.addr);

        Ok(Self {
            runtime,
            transport: Mutex::new(Some(
                FrameTransport::new(stream).with_max_pdu_size(config.max_pdu_size),
            )),
            call_id_counter: AtomicU32::new(1),
            call_timeout: config.call_timeout,
            addr: config.addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the connection is still usable
    pub fn is_open(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Perform one request/response exchange
    ///
    /// A transport failure, timeout or mismatched reply closes the channel.
    /// Fault replies and requests rejected for size before sending do not.
    pub fn call(&self, request: &ProxyRequest) -> Result<ProxyResponse> {
        let op = request.opnum();
        let call_id = self.call_id_counter.fetch_add(1, Ordering::SeqCst);
        let pdu = Pdu::request(call_id, op, request.encode());

        let mut guard = self.transport.lock();
        let transport = guard.as_mut().ok_or(RpcError::ConnectionClosed)?;

        // Nothing has been written yet, so the stream is still in sync
        let size = PduHeader::SIZE + pdu.body.len();
        if size > transport.max_pdu_size() {
            return Err(RpcError::PduTooLarge {
                size,
                max: transport.max_pdu_size(),
            });
        }
        trace!("Calling {} (call_id={})", operation_name(op), call_id);

        let exchanged = self.runtime.block_on(async {
            let exchange = async {
                transport.write_pdu(&pdu).await?;
                transport.read_pdu().await
            };
            match timeout(self.call_timeout, exchange).await {
                Ok(result) => result,
                Err(_) => Err(RpcError::Timeout),
            }
        });

        // A late or foreign reply may still be in flight; drop the stream
        let reply = match exchanged.and_then(|reply| check_reply(call_id, op, reply)) {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Closing proxy connection to {} after {}: {}", self.addr, operation_name(op), err);
                *guard = None;
                return Err(err);
            }
        };
        drop(guard);

        match reply.header.pdu_type {
            PduType::Fault => {
                debug!(
                    "{} faulted with status 0x{:08x}",
                    operation_name(op),
                    reply.header.status
                );
                Err(RpcError::Fault(reply.header.status))
            }
            _ => ProxyResponse::decode(op, &reply.body),
        }
    }

    fn invoke(&self, request: ProxyRequest) -> oletx::Result<ProxyResponse> {
        let op = request.opnum();
        self.call(&request).map_err(|err| match err {
            RpcError::Fault(hresult) => OletxError::Proxy {
                operation: operation_name(op),
                hresult,
            },
            err => err.into(),
        })
    }

    fn invoke_done(&self, request: ProxyRequest) -> oletx::Result<()> {
        match self.invoke(request)? {
            ProxyResponse::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn invoke_blob(&self, request: ProxyRequest) -> oletx::Result<ShimBuffer> {
        match self.invoke(request)? {
            ProxyResponse::Blob(data) => Ok(ShimBuffer::new(data)),
            other => Err(unexpected(other)),
        }
    }

    /// Release an object held by the proxy, logging failures
    fn release(&self, object: ObjectId) {
        if object == 0 {
            return;
        }
        if let Err(err) = self.invoke_done(ProxyRequest::ShimRelease { object }) {
            debug!("Failed to release proxy object {}: {}", object, err);
        }
    }
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("addr", &self.addr)
            .field("open", &self.is_open())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

fn check_reply(call_id: u32, op: u16, reply: Pdu) -> Result<Pdu> {
    if reply.header.call_id != call_id {
        return Err(RpcError::CallIdMismatch {
            expected: call_id,
            got: reply.header.call_id,
        });
    }
    if reply.header.pdu_type == PduType::Request {
        return Err(RpcError::InvalidPdu("request PDU received by client".to_string()));
    }
    if reply.header.opnum != op {
        return Err(RpcError::InvalidPdu(format!(
            "reply for opnum {} to a call of opnum {}",
            reply.header.opnum, op
        )));
    }
    Ok(reply)
}

fn unexpected(response: ProxyResponse) -> OletxError {
    OletxError::Transport(format!("unexpected proxy reply: {:?}", response))
}

/// Proxy shim factory reached over RPC
#[derive(Debug)]
pub struct RpcProxyShimFactory {
    channel: Arc<RpcChannel>,
}

impl RpcProxyShimFactory {
    /// Connect to the proxy endpoint in `config`
    pub fn connect(config: RpcProxyConfig) -> Result<Self> {
        Ok(Self {
            channel: Arc::new(RpcChannel::connect(&config)?),
        })
    }

    pub fn channel(&self) -> &Arc<RpcChannel> {
        &self.channel
    }
}

impl ProxyShimFactory for RpcProxyShimFactory {
    fn connect_to_proxy(
        &self,
        node_name: &str,
        resource_manager_id: Uuid,
        managed_id: Handle,
    ) -> oletx::Result<ProxyConnection> {
        let reply = match self.channel.invoke(ProxyRequest::ConnectToProxy {
            node_name: node_name.to_string(),
            resource_manager_id,
            managed_id: managed_id.value(),
        })? {
            ProxyResponse::Connected(reply) => reply,
            other => return Err(unexpected(other)),
        };

        let resource_manager = (reply.resource_manager != 0).then(|| {
            Box::new(RpcResourceManagerShim {
                channel: self.channel.clone(),
                id: reply.resource_manager,
            }) as Box<dyn ResourceManagerShim>
        });

        Ok(ProxyConnection {
            node_name_matches: reply.node_name_matches,
            whereabouts: reply.whereabouts.map(ShimBuffer::new),
            resource_manager,
        })
    }

    fn receive_transaction(&self, token: &[u8], managed_id: Handle) -> oletx::Result<ReceivedTransaction> {
        let reply = match self.channel.invoke(ProxyRequest::ReceiveTransaction {
            token: token.to_vec(),
            managed_id: managed_id.value(),
        })? {
            ProxyResponse::Received(reply) => reply,
            other => return Err(unexpected(other)),
        };

        let shim = (reply.shim != 0).then(|| {
            Box::new(RpcTransactionShim {
                channel: self.channel.clone(),
                id: reply.shim,
            }) as Box<dyn TransactionShim>
        });

        Ok(ReceivedTransaction {
            transaction_id: reply.transaction_id,
            isolation_level: IsolationLevel::from_raw(reply.isolation_level),
            shim,
        })
    }

    fn get_notification(&self) -> oletx::Result<Option<ShimNotification>> {
        let record = match self.channel.invoke(ProxyRequest::GetNotification)? {
            ProxyResponse::Notification(record) => record,
            other => return Err(unexpected(other)),
        };

        Ok(record.map(|record| ShimNotification {
            handle: Handle::new(record.handle),
            kind: NotificationKind::from_raw(record.kind),
            is_single_phase: record.is_single_phase,
            aborting_hint: record.aborting_hint,
            release_required: record.release_required,
            prepare_info: record.prepare_info.map(ShimBuffer::new),
        }))
    }

    fn release_notification_lock(&self) -> oletx::Result<()> {
        self.channel.invoke_done(ProxyRequest::ReleaseNotificationLock)
    }
}

/// Resource manager registration held by the proxy
struct RpcResourceManagerShim {
    channel: Arc<RpcChannel>,
    id: ObjectId,
}

impl ResourceManagerShim for RpcResourceManagerShim {}

impl Drop for RpcResourceManagerShim {
    fn drop(&mut self) {
        self.channel.release(self.id);
    }
}

/// Transaction shim held by the proxy
pub struct RpcTransactionShim {
    channel: Arc<RpcChannel>,
    id: ObjectId,
}

impl RpcTransactionShim {
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl TransactionShim for RpcTransactionShim {
    fn commit(&self) -> oletx::Result<()> {
        self.channel.invoke_done(ProxyRequest::TransactionCommit { shim: self.id })
    }

    fn abort(&self) -> oletx::Result<()> {
        self.channel.invoke_done(ProxyRequest::TransactionAbort { shim: self.id })
    }

    fn export(&self, whereabouts: &[u8]) -> oletx::Result<ShimBuffer> {
        self.channel.invoke_blob(ProxyRequest::TransactionExport {
            shim: self.id,
            whereabouts: whereabouts.to_vec(),
        })
    }

    fn native_transaction(&self) -> oletx::Result<Box<dyn NativeTransaction>> {
        match self.channel.invoke(ProxyRequest::TransactionGetNative { shim: self.id })? {
            ProxyResponse::Object(0) => Err(OletxError::NativeTransaction(
                "proxy returned no native transaction".to_string(),
            )),
            ProxyResponse::Object(id) => Ok(Box::new(RpcNativeTransaction {
                channel: self.channel.clone(),
                id,
            })),
            other => Err(unexpected(other)),
        }
    }

    fn propagation_token(&self) -> oletx::Result<ShimBuffer> {
        self.channel
            .invoke_blob(ProxyRequest::TransactionGetPropagationToken { shim: self.id })
    }
}

impl Drop for RpcTransactionShim {
    fn drop(&mut self) {
        self.channel.release(self.id);
    }
}

/// Native transaction object held by the proxy
pub struct RpcNativeTransaction {
    channel: Arc<RpcChannel>,
    id: ObjectId,
}

impl NativeTransaction for RpcNativeTransaction {
    fn commit(&self, retaining: bool, grf_tc: u32, grf_rm: u32) -> oletx::Result<()> {
        self.channel.invoke_done(ProxyRequest::NativeCommit {
            native: self.id,
            retaining,
            grf_tc,
            grf_rm,
        })
    }

    fn abort(&self, reason: Option<Uuid>, retaining: bool, asynchronous: bool) -> oletx::Result<()> {
        self.channel.invoke_done(ProxyRequest::NativeAbort {
            native: self.id,
            reason,
            retaining,
            asynchronous,
        })
    }

    fn transaction_info(&self) -> oletx::Result<XactTransInfo> {
        match self
            .channel
            .invoke(ProxyRequest::NativeGetTransactionInfo { native: self.id })?
        {
            ProxyResponse::TransactionInfo(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }
}

impl Drop for RpcNativeTransaction {
    fn drop(&mut self) {
        self.channel.release(self.id);
    }
}
