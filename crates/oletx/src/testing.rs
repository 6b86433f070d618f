//! In-memory coordinator proxy for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{hresult, OletxError, Result};
use crate::handle_table::Handle;
use crate::shim::{
    IsolationLevel, NativeTransaction, NotificationKind, ProxyConnection, ProxyShimFactory,
    ReceivedTransaction, ResourceManagerShim, ShimBuffer, ShimNotification, TransactionShim,
    XactTransInfo,
};
use crate::token::extract_transaction_id;

/// Route bridge logs to the test output; honours `RUST_LOG`
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a 24-byte propagation token for a transaction id
pub(crate) fn token_for(transaction_id: Uuid) -> Vec<u8> {
    let mut token = vec![1, 0, 0, 0, 1, 0, 0, 0];
    token.extend_from_slice(&transaction_id.to_bytes_le());
    token
}

#[derive(Default)]
struct FakeState {
    node_name_matches: AtomicBool,
    fail_connect: AtomicBool,
    reject_imports: AtomicBool,
    fail_imports: AtomicBool,
    fail_exports: AtomicBool,
    connect_delay_ms: AtomicU64,

    connect_calls: AtomicUsize,
    receive_calls: AtomicUsize,
    export_calls: AtomicUsize,
    native_calls: AtomicUsize,
    commit_calls: AtomicUsize,
    import_seq: AtomicU32,

    whereabouts_released: AtomicUsize,
    cookies_released: AtomicUsize,
    resource_managers_released: AtomicUsize,
    shims_released: AtomicUsize,
    notification_locks_released: AtomicUsize,

    last_rm_id: Mutex<Option<Uuid>>,
    last_managed_id: Mutex<Option<Handle>>,
    received_tokens: Mutex<Vec<Vec<u8>>>,
    notifications: Mutex<VecDeque<ShimNotification>>,
}

/// Scripted proxy shim factory
pub(crate) struct FakeProxy {
    state: Arc<FakeState>,
}

impl FakeProxy {
    pub(crate) const WHEREABOUTS: &'static [u8] = b"local-dtc-whereabouts";

    pub(crate) fn new() -> Self {
        init_tracing();
        let state = FakeState::default();
        state.node_name_matches.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    /// Cookie produced by the `seq`-th import exported toward `whereabouts`
    pub(crate) fn cookie_for(seq: u32, whereabouts: &[u8]) -> Vec<u8> {
        let mut cookie = b"cookie".to_vec();
        cookie.extend_from_slice(&seq.to_le_bytes());
        cookie.extend_from_slice(whereabouts);
        cookie
    }

    pub(crate) fn with_connect_delay(self, delay: Duration) -> Self {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_node_name_matches(self, matches: bool) -> Self {
        self.set_node_name_matches(matches);
        self
    }

    pub(crate) fn set_node_name_matches(&self, matches: bool) {
        self.state.node_name_matches.store(matches, Ordering::SeqCst);
    }

    pub(crate) fn with_connect_failure(self) -> Self {
        self.state.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_rejected_imports(self) -> Self {
        self.state.reject_imports.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_import_failure(self) -> Self {
        self.state.fail_imports.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_export_failure(self) -> Self {
        self.state.fail_exports.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn push_notification(&self, handle: Handle, kind: NotificationKind, release_required: bool) {
        self.state.notifications.lock().push_back(ShimNotification {
            handle,
            kind,
            is_single_phase: false,
            aborting_hint: false,
            release_required,
            prepare_info: None,
        });
    }

    pub(crate) fn pending_notifications(&self) -> usize {
        self.state.notifications.lock().len()
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn receive_calls(&self) -> usize {
        self.state.receive_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn export_calls(&self) -> usize {
        self.state.export_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn native_calls(&self) -> usize {
        self.state.native_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn commit_calls(&self) -> usize {
        self.state.commit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn whereabouts_released(&self) -> usize {
        self.state.whereabouts_released.load(Ordering::SeqCst)
    }

    pub(crate) fn cookies_released(&self) -> usize {
        self.state.cookies_released.load(Ordering::SeqCst)
    }

    pub(crate) fn resource_managers_released(&self) -> usize {
        self.state.resource_managers_released.load(Ordering::SeqCst)
    }

    pub(crate) fn shims_released(&self) -> usize {
        self.state.shims_released.load(Ordering::SeqCst)
    }

    pub(crate) fn notification_locks_released(&self) -> usize {
        self.state.notification_locks_released.load(Ordering::SeqCst)
    }

    pub(crate) fn last_rm_id(&self) -> Option<Uuid> {
        *self.state.last_rm_id.lock()
    }

    pub(crate) fn last_managed_id(&self) -> Option<Handle> {
        *self.state.last_managed_id.lock()
    }

    pub(crate) fn received_tokens(&self) -> Vec<Vec<u8>> {
        self.state.received_tokens.lock().clone()
    }
}

impl ProxyShimFactory for FakeProxy {
    fn connect_to_proxy(
        &self,
        _node_name: &str,
        resource_manager_id: Uuid,
        _managed_id: Handle,
    ) -> Result<ProxyConnection> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }

        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(OletxError::Transport("proxy service is not running".to_string()));
        }
        *self.state.last_rm_id.lock() = Some(resource_manager_id);

        let state = self.state.clone();
        let whereabouts = ShimBuffer::with_release(Self::WHEREABOUTS, move || {
            state.whereabouts_released.fetch_add(1, Ordering::SeqCst);
        });

        Ok(ProxyConnection {
            node_name_matches: self.state.node_name_matches.load(Ordering::SeqCst),
            whereabouts: Some(whereabouts),
            resource_manager: Some(Box::new(FakeResourceManager {
                state: self.state.clone(),
            })),
        })
    }

    fn receive_transaction(&self, token: &[u8], managed_id: Handle) -> Result<ReceivedTransaction> {
        self.state.receive_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.last_managed_id.lock() = Some(managed_id);
        self.state.received_tokens.lock().push(token.to_vec());

        if self.state.fail_imports.load(Ordering::SeqCst) {
            return Err(OletxError::Proxy {
                operation: "ReceiveTransaction",
                hresult: hresult::XACT_E_TMNOTAVAILABLE,
            });
        }

        let transaction_id = extract_transaction_id(token)?;
        if self.state.reject_imports.load(Ordering::SeqCst) {
            return Ok(ReceivedTransaction {
                transaction_id,
                isolation_level: IsolationLevel::Unspecified,
                shim: None,
            });
        }

        let seq = self.state.import_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ReceivedTransaction {
            transaction_id,
            isolation_level: IsolationLevel::ReadCommitted,
            shim: Some(Box::new(FakeTransactionShim {
                state: self.state.clone(),
                transaction_id,
                seq,
                token: token.to_vec(),
            })),
        })
    }

    fn get_notification(&self) -> Result<Option<ShimNotification>> {
        Ok(self.state.notifications.lock().pop_front())
    }

    fn release_notification_lock(&self) -> Result<()> {
        self.state
            .notification_locks_released
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeResourceManager {
    state: Arc<FakeState>,
}

impl ResourceManagerShim for FakeResourceManager {}

impl Drop for FakeResourceManager {
    fn drop(&mut self) {
        self.state
            .resource_managers_released
            .fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeTransactionShim {
    state: Arc<FakeState>,
    transaction_id: Uuid,
    seq: u32,
    token: Vec<u8>,
}

impl TransactionShim for FakeTransactionShim {
    fn commit(&self) -> Result<()> {
        self.state.commit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&self) -> Result<()> {
        Ok(())
    }

    fn export(&self, whereabouts: &[u8]) -> Result<ShimBuffer> {
        self.state.export_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_exports.load(Ordering::SeqCst) {
            return Err(OletxError::Proxy {
                operation: "Export",
                hresult: hresult::XACT_E_CONNECTION_DOWN,
            });
        }

        let state = self.state.clone();
        Ok(ShimBuffer::with_release(
            FakeProxy::cookie_for(self.seq, whereabouts),
            move || {
                state.cookies_released.fetch_add(1, Ordering::SeqCst);
            },
        ))
    }

    fn native_transaction(&self) -> Result<Box<dyn NativeTransaction>> {
        self.state.native_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeNativeTransaction {
            uow: self.transaction_id,
        }))
    }

    fn propagation_token(&self) -> Result<ShimBuffer> {
        Ok(ShimBuffer::new(self.token.clone()))
    }
}

impl Drop for FakeTransactionShim {
    fn drop(&mut self) {
        self.state.shims_released.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeNativeTransaction {
    uow: Uuid,
}

impl NativeTransaction for FakeNativeTransaction {
    fn commit(&self, _retaining: bool, _grf_tc: u32, _grf_rm: u32) -> Result<()> {
        Ok(())
    }

    fn abort(&self, _reason: Option<Uuid>, _retaining: bool, _asynchronous: bool) -> Result<()> {
        Ok(())
    }

    fn transaction_info(&self) -> Result<XactTransInfo> {
        Ok(XactTransInfo {
            uow: self.uow,
            iso_level: IsolationLevel::ReadCommitted.to_raw(),
            ..XactTransInfo::default()
        })
    }
}
