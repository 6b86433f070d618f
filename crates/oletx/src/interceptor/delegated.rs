//! Delegating promotable notification
//!
//! Wraps a resource's notification so that promotion publishes the
//! distributed transaction identifier read from the resulting token. All
//! other callbacks pass straight through.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::host::{HostTransaction, PromotableNotification, SinglePhaseEnlistment};
use crate::error::{OletxError, Result};
use crate::token::extract_transaction_id;

/// Promotion progress of a delegated enlistment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromotionState {
    Unpromoted,
    /// The wrapped notification produced a token that is not yet published
    PromotionRequested,
    Promoted,
}

/// Notification adapter installed in place of a resource's own notification
pub struct DelegatedNotification {
    inner: Arc<dyn PromotableNotification>,
    transaction: Weak<dyn HostTransaction>,
    state: Mutex<PromotionState>,
}

impl DelegatedNotification {
    /// Wrap `inner` for enlistment on `transaction`
    pub fn new(transaction: &Arc<dyn HostTransaction>, inner: Arc<dyn PromotableNotification>) -> Self {
        Self {
            inner,
            transaction: Arc::downgrade(transaction),
            state: Mutex::new(PromotionState::Unpromoted),
        }
    }

    /// Current promotion state
    pub fn state(&self) -> PromotionState {
        *self.state.lock()
    }

    /// The wrapped notification
    pub fn inner(&self) -> &Arc<dyn PromotableNotification> {
        &self.inner
    }

    fn promote_and_publish(&self) -> Result<Vec<u8>> {
        let token = match self.inner.promote() {
            Ok(token) => token,
            Err(err) => {
                *self.state.lock() = PromotionState::Unpromoted;
                return Err(err);
            }
        };
        *self.state.lock() = PromotionState::PromotionRequested;

        let transaction_id = extract_transaction_id(&token)?;
        let transaction = self
            .transaction
            .upgrade()
            .ok_or(OletxError::TransactionDisposed)?;
        transaction.set_distributed_identifier(transaction_id)?;

        *self.state.lock() = PromotionState::Promoted;
        debug!("Promoted transaction {}", transaction_id);
        Ok(token)
    }
}

impl PromotableNotification for DelegatedNotification {
    fn initialize(&self) -> Result<()> {
        self.inner.initialize()
    }

    fn promote(&self) -> Result<Vec<u8>> {
        self.promote_and_publish().map_err(OletxError::promotion)
    }

    fn rollback(&self, enlistment: &dyn SinglePhaseEnlistment) -> Result<()> {
        self.inner.rollback(enlistment)
    }

    fn single_phase_commit(&self, enlistment: &dyn SinglePhaseEnlistment) -> Result<()> {
        self.inner.single_phase_commit(enlistment)
    }
}

impl fmt::Debug for DelegatedNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedNotification")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
