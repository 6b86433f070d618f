//! Transaction manager facade
//!
//! The local coordinator acts as a subordinate of the coordinator that
//! promoted the transaction, and as the superior of whichever coordinator a
//! cookie is exported to. Every request pulls the transaction in afresh and
//! drops the shim when the request completes.

use std::sync::Arc;

use tracing::debug;

use crate::error::{OletxError, Result};
use crate::session::ProxySession;
use crate::shim::NativeTransaction;

/// Pull-then-push orchestration over a proxy session
#[derive(Debug)]
pub struct TransactionManager {
    session: Arc<ProxySession>,
}

impl TransactionManager {
    /// Create a facade over a session
    pub fn new(session: Arc<ProxySession>) -> Self {
        Self { session }
    }

    /// The underlying proxy session
    pub fn session(&self) -> &Arc<ProxySession> {
        &self.session
    }

    /// Whereabouts of the local coordinator, connecting first if needed
    pub fn whereabouts(&self) -> Result<Vec<u8>> {
        self.session.ensure_connected()?;
        Ok(self.session.whereabouts().unwrap_or_default().to_vec())
    }

    /// Cookie a resource at `target_whereabouts` can use to join the transaction
    pub fn get_export_cookie(&self, propagation_token: &[u8], target_whereabouts: &[u8]) -> Result<Vec<u8>> {
        let imported = self.session.receive_transaction(propagation_token)?;
        debug!(
            "Exporting transaction {} toward {} byte whereabouts",
            imported.transaction_id,
            target_whereabouts.len()
        );
        self.session
            .export_cookie(imported.shim.as_ref(), target_whereabouts)
    }

    /// Native transaction object for the transaction behind a token
    pub fn get_native_transaction(&self, propagation_token: &[u8]) -> Result<Box<dyn NativeTransaction>> {
        let imported = self.session.receive_transaction(propagation_token)?;
        imported.shim.native_transaction().map_err(|err| match err {
            err @ OletxError::NativeTransaction(_) => err,
            err => OletxError::NativeTransaction(err.to_string()),
        })
    }
}
