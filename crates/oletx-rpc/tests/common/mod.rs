//! Shared fixtures: an in-memory coordinator behind a real proxy server,
//! and a minimal host transaction runtime.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oletx::{
    extract_transaction_id, hresult, HostTransaction, InterceptionRegistry, IsolationLevel,
    NotificationKind, PromotableEnlistment, PromotableNotification, PromoterType,
    SinglePhaseEnlistment, XactTransInfo,
};
use oletx_rpc::{
    ConnectReply, NotificationRecord, ObjectId, ProxyServer, ProxyService, ReceiveReply, RpcError,
    RpcProxyConfig, RpcProxyShimFactory,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

pub const WHEREABOUTS: &[u8] = b"memory-dtc";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 24-byte propagation token for a transaction id
pub fn token_for(transaction_id: Uuid) -> Vec<u8> {
    let mut token = vec![1, 0, 0, 0, 1, 0, 0, 0];
    token.extend_from_slice(&transaction_id.to_bytes_le());
    token
}

/// Cookie the coordinator produces when exporting `transaction_id`
pub fn cookie_for(transaction_id: Uuid, whereabouts: &[u8]) -> Vec<u8> {
    let mut cookie = b"cookie:".to_vec();
    cookie.extend_from_slice(transaction_id.as_bytes());
    cookie.extend_from_slice(whereabouts);
    cookie
}

enum Object {
    ResourceManager,
    Transaction {
        transaction_id: Uuid,
        token: Vec<u8>,
        managed_id: u32,
    },
    Native {
        transaction_id: Uuid,
        managed_id: u32,
    },
}

/// Coordinator keeping every proxy object in memory
#[derive(Default)]
pub struct MemoryCoordinator {
    next_id: AtomicU64,
    objects: Mutex<HashMap<ObjectId, Object>>,
    notifications: Mutex<VecDeque<NotificationRecord>>,
    connect_delay_ms: AtomicU64,
    refuse_imports: AtomicBool,

    pub connects: AtomicUsize,
    pub imports: AtomicUsize,
    pub exports: AtomicUsize,
    pub releases: AtomicUsize,
    pub lock_releases: AtomicUsize,
    pub committed: Mutex<Vec<Uuid>>,
}

impl MemoryCoordinator {
    pub fn refuse_imports(&self) {
        self.refuse_imports.store(true, Ordering::SeqCst);
    }

    pub fn delay_connect(&self, delay: Duration) {
        self.connect_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn live_objects(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn insert(&self, object: Object) -> ObjectId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.objects.lock().insert(id, object);
        id
    }

    fn transaction(&self, shim: ObjectId) -> Result<(Uuid, Vec<u8>, u32), RpcError> {
        match self.objects.lock().get(&shim) {
            Some(Object::Transaction {
                transaction_id,
                token,
                managed_id,
            }) => Ok((*transaction_id, token.clone(), *managed_id)),
            _ => Err(RpcError::Fault(hresult::XACT_E_NOTRANSACTION)),
        }
    }

    fn native(&self, native: ObjectId) -> Result<(Uuid, u32), RpcError> {
        match self.objects.lock().get(&native) {
            Some(Object::Native {
                transaction_id,
                managed_id,
            }) => Ok((*transaction_id, *managed_id)),
            _ => Err(RpcError::Fault(hresult::XACT_E_NOTRANSACTION)),
        }
    }

    fn notify(&self, managed_id: u32, kind: NotificationKind) {
        self.notifications.lock().push_back(NotificationRecord {
            handle: managed_id,
            kind: kind.to_raw(),
            is_single_phase: false,
            aborting_hint: false,
            release_required: true,
            prepare_info: None,
        });
    }

    fn finish(&self, transaction_id: Uuid, managed_id: u32, kind: NotificationKind) {
        if kind == NotificationKind::Committed {
            self.committed.lock().push(transaction_id);
        }
        self.notify(managed_id, kind);
    }
}

#[async_trait]
impl ProxyService for MemoryCoordinator {
    async fn connect_to_proxy(
        &self,
        node_name: String,
        _resource_manager_id: Uuid,
        _managed_id: u32,
    ) -> Result<ConnectReply, RpcError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        Ok(ConnectReply {
            node_name_matches: node_name.is_empty() || node_name == "memory-dtc",
            whereabouts: Some(WHEREABOUTS.to_vec()),
            resource_manager: self.insert(Object::ResourceManager),
        })
    }

    async fn receive_transaction(&self, token: Vec<u8>, managed_id: u32) -> Result<ReceiveReply, RpcError> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        if self.refuse_imports.load(Ordering::SeqCst) {
            return Err(RpcError::Fault(hresult::XACT_E_TMNOTAVAILABLE));
        }

        let transaction_id =
            extract_transaction_id(&token).map_err(|_| RpcError::Fault(hresult::E_INVALIDARG))?;
        let shim = self.insert(Object::Transaction {
            transaction_id,
            token,
            managed_id,
        });
        Ok(ReceiveReply {
            transaction_id,
            isolation_level: IsolationLevel::ReadCommitted.to_raw(),
            shim,
        })
    }

    async fn get_notification(&self) -> Result<Option<NotificationRecord>, RpcError> {
        Ok(self.notifications.lock().pop_front())
    }

    async fn release_notification_lock(&self) -> Result<(), RpcError> {
        self.lock_releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self, shim: ObjectId) -> Result<(), RpcError> {
        let (transaction_id, _, managed_id) = self.transaction(shim)?;
        self.finish(transaction_id, managed_id, NotificationKind::Committed);
        Ok(())
    }

    async fn abort(&self, shim: ObjectId) -> Result<(), RpcError> {
        let (transaction_id, _, managed_id) = self.transaction(shim)?;
        self.finish(transaction_id, managed_id, NotificationKind::Aborted);
        Ok(())
    }

    async fn export(&self, shim: ObjectId, whereabouts: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        let (transaction_id, _, _) = self.transaction(shim)?;
        Ok(cookie_for(transaction_id, &whereabouts))
    }

    async fn native_transaction(&self, shim: ObjectId) -> Result<ObjectId, RpcError> {
        let (transaction_id, _, managed_id) = self.transaction(shim)?;
        Ok(self.insert(Object::Native {
            transaction_id,
            managed_id,
        }))
    }

    async fn propagation_token(&self, shim: ObjectId) -> Result<Vec<u8>, RpcError> {
        self.transaction(shim).map(|(_, token, _)| token)
    }

    async fn release(&self, object: ObjectId) -> Result<(), RpcError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        match self.objects.lock().remove(&object) {
            Some(_) => Ok(()),
            None => Err(RpcError::Fault(hresult::E_INVALIDARG)),
        }
    }

    async fn native_commit(
        &self,
        native: ObjectId,
        _retaining: bool,
        _grf_tc: u32,
        _grf_rm: u32,
    ) -> Result<(), RpcError> {
        let (transaction_id, managed_id) = self.native(native)?;
        self.finish(transaction_id, managed_id, NotificationKind::Committed);
        Ok(())
    }

    async fn native_abort(
        &self,
        native: ObjectId,
        _reason: Option<Uuid>,
        _retaining: bool,
        _asynchronous: bool,
    ) -> Result<(), RpcError> {
        let (transaction_id, managed_id) = self.native(native)?;
        self.finish(transaction_id, managed_id, NotificationKind::Aborted);
        Ok(())
    }

    async fn native_transaction_info(&self, native: ObjectId) -> Result<XactTransInfo, RpcError> {
        let (transaction_id, _) = self.native(native)?;
        Ok(XactTransInfo {
            uow: transaction_id,
            iso_level: IsolationLevel::ReadCommitted.to_raw(),
            ..XactTransInfo::default()
        })
    }
}

/// Proxy server running on its own runtime
pub struct TestProxy {
    runtime: Runtime,
    pub addr: SocketAddr,
    pub coordinator: Arc<MemoryCoordinator>,
}

impl TestProxy {
    pub fn start() -> Self {
        init_tracing();
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let coordinator = Arc::new(MemoryCoordinator::default());
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = ProxyServer::new(coordinator.clone());
        runtime.spawn(async move {
            let _ = server.serve(listener).await;
        });

        Self {
            runtime,
            addr,
            coordinator,
        }
    }

    pub fn config(&self) -> RpcProxyConfig {
        RpcProxyConfig::new(self.addr).call_timeout(Duration::from_secs(5))
    }

    pub fn factory(&self) -> Arc<RpcProxyShimFactory> {
        Arc::new(RpcProxyShimFactory::connect(self.config()).unwrap())
    }
}

/// Resource whose local transaction promotes to a fixed distributed id
pub struct Database {
    transaction_id: Uuid,
    pub promotions: AtomicUsize,
}

impl Database {
    pub fn new(transaction_id: Uuid) -> Self {
        Self {
            transaction_id,
            promotions: AtomicUsize::new(0),
        }
    }
}

impl PromotableNotification for Database {
    fn initialize(&self) -> oletx::Result<()> {
        Ok(())
    }

    fn promote(&self) -> oletx::Result<Vec<u8>> {
        self.promotions.fetch_add(1, Ordering::SeqCst);
        Ok(token_for(self.transaction_id))
    }

    fn rollback(&self, enlistment: &dyn SinglePhaseEnlistment) -> oletx::Result<()> {
        enlistment.aborted(None);
        Ok(())
    }

    fn single_phase_commit(&self, enlistment: &dyn SinglePhaseEnlistment) -> oletx::Result<()> {
        enlistment.committed();
        Ok(())
    }
}

/// Host transaction that promotes through its enlisted notification
#[derive(Default)]
pub struct HostTx {
    enlistment: Mutex<Option<PromotableEnlistment>>,
    token: Mutex<Option<Vec<u8>>>,
    distributed_id: Mutex<Option<Uuid>>,
}

impl HostTx {
    /// Enlist `notification` through the registry and record what comes back
    pub fn enlist(
        self: &Arc<Self>,
        registry: &InterceptionRegistry,
        notification: Arc<dyn PromotableNotification>,
        promoter_type: PromoterType,
    ) {
        let transaction: Arc<dyn HostTransaction> = self.clone();
        let enlistment =
            registry.enlist_promotable(&transaction, PromotableEnlistment::new(notification, promoter_type));
        *self.enlistment.lock() = Some(enlistment);
    }

    pub fn distributed_id(&self) -> Option<Uuid> {
        *self.distributed_id.lock()
    }
}

impl HostTransaction for HostTx {
    fn promoter_type(&self) -> Option<PromoterType> {
        self.enlistment.lock().as_ref().map(|e| e.promoter_type)
    }

    fn promoted_token(&self) -> oletx::Result<Option<Vec<u8>>> {
        if let Some(token) = self.token.lock().clone() {
            return Ok(Some(token));
        }
        let notification = match self.enlistment.lock().as_ref() {
            Some(enlistment) => enlistment.notification.clone(),
            None => return Ok(None),
        };
        let token = notification.promote()?;
        *self.token.lock() = Some(token.clone());
        Ok(Some(token))
    }

    fn set_distributed_identifier(&self, transaction_id: Uuid) -> oletx::Result<()> {
        *self.distributed_id.lock() = Some(transaction_id);
        Ok(())
    }
}
