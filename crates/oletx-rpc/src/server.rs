//! Proxy RPC server
//!
//! Hosts a [`ProxyService`] implementation behind the proxy protocol. Each
//! accepted connection is served in its own Tokio task; requests on one
//! connection are answered in order.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use oletx::{hresult, XactTransInfo};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, RpcError};
use crate::pdu::{fault, Pdu, PduType};
use crate::protocol::{
    ConnectReply, NotificationRecord, ObjectId, ProxyRequest, ProxyResponse, ReceiveReply,
};
use crate::transport::{FrameTransport, DEFAULT_MAX_PDU_SIZE};

/// Coordinator-side implementation of the proxy operations
///
/// Returning [`RpcError::Fault`] answers the call with that status; any
/// other error is reported as `E_FAIL`.
#[async_trait]
pub trait ProxyService: Send + Sync + 'static {
    async fn connect_to_proxy(
        &self,
        node_name: String,
        resource_manager_id: Uuid,
        managed_id: u32,
    ) -> Result<ConnectReply>;

    async fn receive_transaction(&self, token: Vec<u8>, managed_id: u32) -> Result<ReceiveReply>;

    async fn get_notification(&self) -> Result<Option<NotificationRecord>>;

    async fn release_notification_lock(&self) -> Result<()>;

    async fn commit(&self, shim: ObjectId) -> Result<()>;

    async fn abort(&self, shim: ObjectId) -> Result<()>;

    async fn export(&self, shim: ObjectId, whereabouts: Vec<u8>) -> Result<Vec<u8>>;

    async fn native_transaction(&self, shim: ObjectId) -> Result<ObjectId>;

    async fn propagation_token(&self, shim: ObjectId) -> Result<Vec<u8>>;

    /// Drop the proxy's reference to an object
    async fn release(&self, object: ObjectId) -> Result<()>;

    async fn native_commit(&self, native: ObjectId, retaining: bool, grf_tc: u32, grf_rm: u32) -> Result<()>;

    async fn native_abort(
        &self,
        native: ObjectId,
        reason: Option<Uuid>,
        retaining: bool,
        asynchronous: bool,
    ) -> Result<()>;

    async fn native_transaction_info(&self, native: ObjectId) -> Result<XactTransInfo>;
}

/// Server statistics
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    pub requests_processed: AtomicU64,
    pub requests_failed: AtomicU64,
}

/// Proxy protocol server
pub struct ProxyServer {
    service: Arc<dyn ProxyService>,
    max_pdu_size: usize,
    stats: Arc<ServerStats>,
}

impl ProxyServer {
    pub fn new(service: Arc<dyn ProxyService>) -> Self {
        Self {
            service,
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            stats: Arc::new(ServerStats::default()),
        }
    }

    pub fn with_max_pdu_size(mut self, max_size: usize) -> Self {
        self.max_pdu_size = max_size;
        self
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Bind `addr` and serve until an accept error
    pub async fn run(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("Transaction manager proxy listening on {}", listener.local_addr()?);
        loop {
            self.accept_one(&listener).await?;
        }
    }

    /// Serve connections until `shutdown` completes
    pub async fn serve_until<F: Future<Output = ()>>(&self, listener: TcpListener, shutdown: F) -> Result<()> {
        info!("Transaction manager proxy listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Proxy server shutting down");
                    return Ok(());
                }

                result = self.accept_one(&listener) => result?,
            }
        }
    }

    async fn accept_one(&self, listener: &TcpListener) -> Result<()> {
        let (stream, peer_addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        debug!("Accepted connection from {}", peer_addr);

        // Each connection gets its own task
        let service = Arc::clone(&self.service);
        let stats = Arc::clone(&self.stats);
        let max_pdu_size = self.max_pdu_size;

        tokio::spawn(async move {
            match handle_connection(stream, service, max_pdu_size, &stats).await {
                Ok(()) | Err(RpcError::ConnectionClosed) => {
                    debug!("Connection closed from {}", peer_addr);
                }
                Err(e) => warn!("Connection error from {}: {}", peer_addr, e),
            }
        });
        Ok(())
    }

    /// Serve a single already-established stream
    pub async fn serve_connection<T>(&self, stream: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        handle_connection(stream, Arc::clone(&self.service), self.max_pdu_size, &self.stats).await
    }
}

async fn handle_connection<T>(
    stream: T,
    service: Arc<dyn ProxyService>,
    max_pdu_size: usize,
    stats: &ServerStats,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut transport = FrameTransport::new(stream).with_max_pdu_size(max_pdu_size);

    loop {
        // Clients are strictly request/response; anything else is dropped
        let pdu = transport.read_pdu().await?;
        if pdu.header.pdu_type != PduType::Request {
            warn!("Ignoring {:?} PDU from client", pdu.header.pdu_type);
            continue;
        }

        let reply = process_request(&pdu, service.as_ref(), stats).await;
        transport.write_pdu(&reply).await?;
    }
}

async fn process_request(request: &Pdu, service: &dyn ProxyService, stats: &ServerStats) -> Pdu {
    let call_id = request.header.call_id;
    let op = request.header.opnum;

    // Decode failures never reach the service
    let decoded = match ProxyRequest::decode(op, &request.body) {
        Ok(decoded) => decoded,
        Err(RpcError::OperationUnavailable(_)) => {
            stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            warn!("Unknown opnum {} (call_id={})", op, call_id);
            return Pdu::fault(call_id, op, fault::OP_RNG_ERROR);
        }
        Err(e) => {
            stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            warn!("Malformed request for opnum {}: {}", op, e);
            return Pdu::fault(call_id, op, fault::BAD_STUB_DATA);
        }
    };

    // Service faults keep their status, anything else is E_FAIL
    match dispatch(service, decoded).await {
        Ok(response) => {
            stats.requests_processed.fetch_add(1, Ordering::Relaxed);
            Pdu::response(call_id, op, response.encode())
        }
        Err(RpcError::Fault(status)) => {
            stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            debug!("Opnum {} faulted with status 0x{:08x}", op, status);
            Pdu::fault(call_id, op, status)
        }
        Err(e) => {
            stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            error!("Operation error: {}", e);
            Pdu::fault(call_id, op, hresult::E_FAIL)
        }
    }
}

async fn dispatch(service: &dyn ProxyService, request: ProxyRequest) -> Result<ProxyResponse> {
    let response = match request {
        ProxyRequest::ConnectToProxy {
            node_name,
            resource_manager_id,
            managed_id,
        } => ProxyResponse::Connected(
            service
                .connect_to_proxy(node_name, resource_manager_id, managed_id)
                .await?,
        ),
        ProxyRequest::ReceiveTransaction { token, managed_id } => {
            ProxyResponse::Received(service.receive_transaction(token, managed_id).await?)
        }
        ProxyRequest::GetNotification => ProxyResponse::Notification(service.get_notification().await?),
        ProxyRequest::ReleaseNotificationLock => {
            service.release_notification_lock().await?;
            ProxyResponse::Done
        }
        ProxyRequest::TransactionCommit { shim } => {
            service.commit(shim).await?;
            ProxyResponse::Done
        }
        ProxyRequest::TransactionAbort { shim } => {
            service.abort(shim).await?;
            ProxyResponse::Done
        }
        ProxyRequest::TransactionExport { shim, whereabouts } => {
            ProxyResponse::Blob(service.export(shim, whereabouts).await?)
        }
        ProxyRequest::TransactionGetNative { shim } => ProxyResponse::Object(service.native_transaction(shim).await?),
        ProxyRequest::TransactionGetPropagationToken { shim } => {
            ProxyResponse::Blob(service.propagation_token(shim).await?)
        }
        ProxyRequest::ShimRelease { object } => {
            service.release(object).await?;
            ProxyResponse::Done
        }
        ProxyRequest::NativeCommit {
            native,
            retaining,
            grf_tc,
            grf_rm,
        } => {
            service.native_commit(native, retaining, grf_tc, grf_rm).await?;
            ProxyResponse::Done
        }
        ProxyRequest::NativeAbort {
            native,
            reason,
            retaining,
            asynchronous,
        } => {
            service.native_abort(native, reason, retaining, asynchronous).await?;
            ProxyResponse::Done
        }
        ProxyRequest::NativeGetTransactionInfo { native } => {
            ProxyResponse::TransactionInfo(service.native_transaction_info(native).await?)
        }
    };
    Ok(response)
}
