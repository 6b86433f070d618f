//! Proxy session
//!
//! One lazily established connection to the local coordinator's proxy.
//! The connect handshake runs at most once per session; import and export
//! calls block for the full round trip to the proxy, which may itself talk
//! to a remote coordinator.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{OletxError, Result};
use crate::handle_table::{Handle, HandleTable};
use crate::shim::{
    IsolationLevel, NotificationKind, ProxyConnection, ProxyShimFactory, ResourceManagerShim,
    ShimNotification, TransactionOutcome, TransactionShim,
};

/// Identity of this process's resource manager at the proxy
#[derive(Debug)]
pub struct ResourceManagerIdentity {
    id: Uuid,
}

impl ResourceManagerIdentity {
    fn generate() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Resource manager identifier
    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Default)]
struct OutcomeState {
    transaction_id: Option<Uuid>,
    outcome: TransactionOutcome,
    in_doubt: bool,
}

/// Receiver of the outcome of an imported transaction
///
/// Registered in the handle table for every import; the proxy addresses the
/// outcome notification to its handle.
#[derive(Debug, Default)]
pub struct OutcomeEnlistment {
    state: Mutex<OutcomeState>,
}

impl OutcomeEnlistment {
    fn new() -> Self {
        Self::default()
    }

    fn bind(&self, transaction_id: Uuid) {
        self.state.lock().transaction_id = Some(transaction_id);
    }

    /// Identifier of the imported transaction
    pub fn transaction_id(&self) -> Option<Uuid> {
        self.state.lock().transaction_id
    }

    /// Outcome reported so far
    pub fn outcome(&self) -> TransactionOutcome {
        self.state.lock().outcome
    }

    /// Whether the coordinator reported the outcome as in doubt
    pub fn is_in_doubt(&self) -> bool {
        self.state.lock().in_doubt
    }

    /// Record a notification, returning true once the outcome is final
    fn record(&self, kind: NotificationKind) -> bool {
        let mut state = self.state.lock();
        match kind {
            NotificationKind::Committed => state.outcome = TransactionOutcome::Committed,
            NotificationKind::Aborted => state.outcome = TransactionOutcome::Aborted,
            NotificationKind::InDoubt | NotificationKind::EnlistmentTmDown => state.in_doubt = true,
            _ => return false,
        }
        true
    }
}

/// A transaction pulled into the local coordinator
pub struct ImportedTransaction {
    /// Live shim, owned by the caller that imported it
    pub shim: Box<dyn TransactionShim>,
    pub transaction_id: Uuid,
    pub isolation_level: IsolationLevel,
    /// Handle the proxy reports the outcome to
    pub outcome_handle: Handle,
    pub outcome: Arc<OutcomeEnlistment>,
}

impl fmt::Debug for ImportedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportedTransaction")
            .field("transaction_id", &self.transaction_id)
            .field("isolation_level", &self.isolation_level)
            .field("outcome_handle", &self.outcome_handle)
            .finish()
    }
}

/// State recorded by the one successful connect
struct Connected {
    whereabouts: Vec<u8>,
    resource_manager_handle: Handle,
    // Held for the session's lifetime
    _resource_manager: Option<Box<dyn ResourceManagerShim>>,
}

/// Connection to the coordinator proxy
pub struct ProxySession {
    factory: Arc<dyn ProxyShimFactory>,
    handles: Arc<HandleTable>,
    node_name: String,
    resource_manager: Arc<ResourceManagerIdentity>,
    connected: OnceLock<Connected>,
    connect_lock: Mutex<()>,
}

impl ProxySession {
    /// Create an unconnected session
    pub fn new(
        factory: Arc<dyn ProxyShimFactory>,
        handles: Arc<HandleTable>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            handles,
            node_name: node_name.into(),
            resource_manager: Arc::new(ResourceManagerIdentity::generate()),
            connected: OnceLock::new(),
            connect_lock: Mutex::new(()),
        }
    }

    /// Whether the connect handshake has completed
    pub fn is_connected(&self) -> bool {
        self.connected.get().is_some()
    }

    /// Identifier of the resource manager registered on connect
    pub fn resource_manager_id(&self) -> Uuid {
        self.resource_manager.id()
    }

    /// Whereabouts of the local coordinator, once connected
    pub fn whereabouts(&self) -> Option<&[u8]> {
        self.connected.get().map(|state| state.whereabouts.as_slice())
    }

    /// Handle table shared with the proxy
    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    /// Connect to the proxy unless already connected
    pub fn ensure_connected(&self) -> Result<()> {
        self.connected_state().map(|_| ())
    }

    fn connected_state(&self) -> Result<&Connected> {
        if let Some(state) = self.connected.get() {
            return Ok(state);
        }

        let _guard = self.connect_lock.lock();
        if let Some(state) = self.connected.get() {
            return Ok(state);
        }

        let state = self.connect()?;
        Ok(self.connected.get_or_init(|| state))
    }

    fn connect(&self) -> Result<Connected> {
        let rm_handle = self.handles.allocate(self.resource_manager.clone());
        debug!(
            "Connecting to transaction manager proxy: node={:?}, rm={}, handle={}",
            self.node_name,
            self.resource_manager.id(),
            rm_handle
        );

        let connection =
            match self
                .factory
                .connect_to_proxy(&self.node_name, self.resource_manager.id(), rm_handle)
            {
                Ok(connection) => connection,
                Err(err) => {
                    self.handles.release(rm_handle);
                    return Err(connect_error(err));
                }
            };

        let ProxyConnection {
            node_name_matches,
            whereabouts,
            resource_manager,
        } = connection;

        if !node_name_matches {
            // Dropping the partial connection releases its buffer and shim
            self.handles.release(rm_handle);
            return Err(OletxError::ProxyConnect(format!(
                "node name {:?} does not match the proxy's node",
                self.node_name
            )));
        }

        let whereabouts = whereabouts
            .map(|buffer| buffer.as_bytes().to_vec())
            .unwrap_or_default();

        info!(
            "Connected to transaction manager proxy: whereabouts={} bytes",
            whereabouts.len()
        );

        Ok(Connected {
            whereabouts,
            resource_manager_handle: rm_handle,
            _resource_manager: resource_manager,
        })
    }

    /// Pull-propagate the transaction named by a propagation token
    pub fn receive_transaction(&self, token: &[u8]) -> Result<ImportedTransaction> {
        self.ensure_connected()?;

        let outcome = Arc::new(OutcomeEnlistment::new());
        let handle = self.handles.allocate(outcome.clone());
        trace!("Receiving transaction: token={} bytes, handle={}", token.len(), handle);

        let received = match self.factory.receive_transaction(token, handle) {
            Ok(received) => received,
            Err(err) => {
                self.handles.release(handle);
                return Err(import_error(err));
            }
        };

        let Some(shim) = received.shim else {
            self.handles.release(handle);
            return Err(OletxError::TransactionImport(
                "the proxy returned no transaction shim".to_string(),
            ));
        };

        outcome.bind(received.transaction_id);
        debug!(
            "Received transaction {} ({:?})",
            received.transaction_id, received.isolation_level
        );

        Ok(ImportedTransaction {
            shim,
            transaction_id: received.transaction_id,
            isolation_level: received.isolation_level,
            outcome_handle: handle,
            outcome,
        })
    }

    /// Push-propagate a transaction toward the coordinator at `whereabouts`
    pub fn export_cookie(&self, shim: &dyn TransactionShim, whereabouts: &[u8]) -> Result<Vec<u8>> {
        self.ensure_connected()?;

        let buffer = shim.export(whereabouts).map_err(export_error)?;
        let cookie = buffer.as_bytes().to_vec();
        drop(buffer);

        trace!(
            "Exported cookie: whereabouts={} bytes, cookie={} bytes",
            whereabouts.len(),
            cookie.len()
        );
        Ok(cookie)
    }

    /// Drain notifications queued by the proxy
    ///
    /// Returns the number of notifications dispatched.
    pub fn process_notifications(&self) -> Result<usize> {
        let Some(state) = self.connected.get() else {
            return Ok(0);
        };

        let mut dispatched = 0;
        while let Some(notification) = self.factory.get_notification()? {
            let release_required = notification.release_required;
            let done = notification.kind == NotificationKind::None;

            if !done {
                self.dispatch(state, &notification);
                dispatched += 1;
            }

            if release_required {
                self.factory.release_notification_lock()?;
            }

            if done {
                break;
            }
        }

        Ok(dispatched)
    }

    fn dispatch(&self, state: &Connected, notification: &ShimNotification) {
        let handle = notification.handle;
        if handle.is_null() {
            warn!("Notification {:?} without a handle", notification.kind);
            return;
        }

        if handle == state.resource_manager_handle {
            match notification.kind {
                NotificationKind::ResourceManagerTmDown => {
                    warn!("Transaction manager went down for resource manager {}", self.resource_manager.id());
                }
                kind => debug!("Resource manager notification {:?}", kind),
            }
            return;
        }

        let Some(outcome) = self.handles.lookup_as::<OutcomeEnlistment>(handle) else {
            warn!("Notification {:?} for unknown handle {}", notification.kind, handle);
            return;
        };

        if outcome.record(notification.kind) {
            self.handles.release(handle);
            debug!(
                "Transaction {:?} outcome: {:?} (in doubt: {})",
                outcome.transaction_id(),
                outcome.outcome(),
                outcome.is_in_doubt()
            );
        } else {
            trace!("Ignoring notification {:?} for handle {}", notification.kind, handle);
        }
    }
}

impl fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySession")
            .field("node_name", &self.node_name)
            .field("resource_manager", &self.resource_manager.id())
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn connect_error(err: OletxError) -> OletxError {
    match err {
        err @ OletxError::ProxyConnect(_) => err,
        err => OletxError::ProxyConnect(err.to_string()),
    }
}

fn import_error(err: OletxError) -> OletxError {
    match err {
        err @ OletxError::TransactionImport(_) => err,
        err => OletxError::TransactionImport(err.to_string()),
    }
}

fn export_error(err: OletxError) -> OletxError {
    match err {
        err @ OletxError::TransactionExport(_) => err,
        err => OletxError::TransactionExport(err.to_string()),
    }
}
