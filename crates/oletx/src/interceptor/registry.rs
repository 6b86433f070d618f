//! Interception registry
//!
//! The host transaction runtime consults the registry at each of its three
//! interception seams. An installed interceptor either replaces the native
//! behavior or defers to it; with nothing installed the native path runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use super::host::{HostTransaction, PromotableEnlistment};
use crate::error::Result;
use crate::shim::NativeTransaction;

/// Host runtime entry points that can be intercepted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Registration of a promotable single-phase enlistment
    EnlistPromotableSinglePhase,
    /// Export of a cookie for a target coordinator
    GetExportCookie,
    /// Retrieval of the native transaction object
    GetNativeTransaction,
}

impl EntryPoint {
    /// Every interceptable entry point
    pub const ALL: [EntryPoint; 3] = [
        EntryPoint::EnlistPromotableSinglePhase,
        EntryPoint::GetExportCookie,
        EntryPoint::GetNativeTransaction,
    ];
}

/// Decision of an interceptor at a seam
#[derive(Debug)]
pub enum Intercept<T> {
    /// Use this result instead of the native path
    Replaced(T),
    /// Run the native path unchanged
    Defer,
}

/// Replacement behavior for the host runtime's entry points
pub trait TransactionInterceptor: Send + Sync {
    /// Rewrite a promotable enlistment before the host records it
    fn enlist_promotable(
        &self,
        transaction: &Arc<dyn HostTransaction>,
        enlistment: PromotableEnlistment,
    ) -> PromotableEnlistment;

    /// Produce an export cookie for `whereabouts`, or defer
    fn export_cookie(
        &self,
        transaction: &dyn HostTransaction,
        whereabouts: &[u8],
    ) -> Result<Intercept<Option<Vec<u8>>>>;

    /// Produce the native transaction object, or defer
    fn native_transaction(
        &self,
        transaction: &dyn HostTransaction,
    ) -> Result<Intercept<Option<Box<dyn NativeTransaction>>>>;
}

/// Entry point → interceptor table consulted by the host runtime
#[derive(Default)]
pub struct InterceptionRegistry {
    routes: RwLock<HashMap<EntryPoint, Arc<dyn TransactionInterceptor>>>,
}

impl InterceptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an interceptor for one entry point
    pub fn install(&self, entry: EntryPoint, interceptor: Arc<dyn TransactionInterceptor>) {
        let previous = self.routes.write().insert(entry, interceptor);
        if previous.is_some() {
            warn!("Replaced interceptor for {:?}", entry);
        } else {
            debug!("Installed interceptor for {:?}", entry);
        }
    }

    /// Install an interceptor for every entry point
    pub fn install_all(&self, interceptor: Arc<dyn TransactionInterceptor>) {
        for entry in EntryPoint::ALL {
            self.install(entry, interceptor.clone());
        }
    }

    /// Remove the interceptor for an entry point
    pub fn remove(&self, entry: EntryPoint) -> bool {
        self.routes.write().remove(&entry).is_some()
    }

    /// Whether an interceptor is installed for an entry point
    pub fn is_installed(&self, entry: EntryPoint) -> bool {
        self.routes.read().contains_key(&entry)
    }

    fn route(&self, entry: EntryPoint) -> Option<Arc<dyn TransactionInterceptor>> {
        self.routes.read().get(&entry).cloned()
    }

    /// Seam: a promotable enlistment is being registered
    pub fn enlist_promotable(
        &self,
        transaction: &Arc<dyn HostTransaction>,
        enlistment: PromotableEnlistment,
    ) -> PromotableEnlistment {
        match self.route(EntryPoint::EnlistPromotableSinglePhase) {
            Some(interceptor) => interceptor.enlist_promotable(transaction, enlistment),
            None => enlistment,
        }
    }

    /// Seam: an export cookie is requested; `native` runs when not intercepted
    pub fn get_export_cookie<F>(
        &self,
        transaction: &dyn HostTransaction,
        whereabouts: &[u8],
        native: F,
    ) -> Result<Option<Vec<u8>>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(interceptor) = self.route(EntryPoint::GetExportCookie) {
            if let Intercept::Replaced(cookie) = interceptor.export_cookie(transaction, whereabouts)? {
                return Ok(cookie);
            }
        }
        trace!("Export cookie request takes the native path");
        native().map(Some)
    }

    /// Seam: the native transaction is requested; `native` runs when not intercepted
    pub fn get_native_transaction<F>(
        &self,
        transaction: &dyn HostTransaction,
        native: F,
    ) -> Result<Option<Box<dyn NativeTransaction>>>
    where
        F: FnOnce() -> Result<Box<dyn NativeTransaction>>,
    {
        if let Some(interceptor) = self.route(EntryPoint::GetNativeTransaction) {
            if let Intercept::Replaced(native_tx) = interceptor.native_transaction(transaction)? {
                return Ok(native_tx);
            }
        }
        trace!("Native transaction request takes the native path");
        native().map(Some)
    }
}

impl fmt::Debug for InterceptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes = self.routes.read();
        let mut installed: Vec<_> = routes.keys().collect();
        installed.sort_by_key(|entry| format!("{:?}", entry));
        f.debug_struct("InterceptionRegistry")
            .field("installed", &installed)
            .finish()
    }
}
