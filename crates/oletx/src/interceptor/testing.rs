//! Host runtime fakes for interceptor tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::host::{
    HostTransaction, PromotableEnlistment, PromotableNotification, PromoterType,
    SinglePhaseEnlistment,
};
use crate::error::{OletxError, Result};

/// Host transaction that records what the interceptor does to it
pub(crate) struct FakeTransaction {
    token: Option<Vec<u8>>,
    promoter_type: Mutex<Option<PromoterType>>,
    notification: Mutex<Option<Arc<dyn PromotableNotification>>>,
    distributed_identifier: Mutex<Option<Uuid>>,
    token_requests: AtomicUsize,
}

impl FakeTransaction {
    pub(crate) fn new(token: Option<Vec<u8>>) -> Self {
        Self {
            token,
            promoter_type: Mutex::new(None),
            notification: Mutex::new(None),
            distributed_identifier: Mutex::new(None),
            token_requests: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_promoter(self, promoter_type: PromoterType) -> Self {
        *self.promoter_type.lock() = Some(promoter_type);
        self
    }

    /// Store the enlistment the way the host runtime would
    pub(crate) fn record_enlistment(&self, enlistment: &PromotableEnlistment) {
        *self.promoter_type.lock() = Some(enlistment.promoter_type);
        *self.notification.lock() = Some(enlistment.notification.clone());
    }

    pub(crate) fn notification(&self) -> Option<Arc<dyn PromotableNotification>> {
        self.notification.lock().clone()
    }

    pub(crate) fn distributed_identifier(&self) -> Option<Uuid> {
        *self.distributed_identifier.lock()
    }

    pub(crate) fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }
}

impl HostTransaction for FakeTransaction {
    fn promoter_type(&self) -> Option<PromoterType> {
        *self.promoter_type.lock()
    }

    fn promoted_token(&self) -> Result<Option<Vec<u8>>> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.token.clone())
    }

    fn set_distributed_identifier(&self, transaction_id: Uuid) -> Result<()> {
        *self.distributed_identifier.lock() = Some(transaction_id);
        Ok(())
    }
}

/// Resource notification returning a fixed token
pub(crate) struct FakeNotification {
    token: Option<Vec<u8>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeNotification {
    pub(crate) fn new(token: Vec<u8>) -> Self {
        Self {
            token: Some(token),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            token: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

impl PromotableNotification for FakeNotification {
    fn initialize(&self) -> Result<()> {
        self.calls.lock().push("initialize");
        Ok(())
    }

    fn promote(&self) -> Result<Vec<u8>> {
        self.calls.lock().push("promote");
        self.token
            .clone()
            .ok_or_else(|| OletxError::Transport("database refused to promote".to_string()))
    }

    fn rollback(&self, enlistment: &dyn SinglePhaseEnlistment) -> Result<()> {
        self.calls.lock().push("rollback");
        enlistment.aborted(None);
        Ok(())
    }

    fn single_phase_commit(&self, enlistment: &dyn SinglePhaseEnlistment) -> Result<()> {
        self.calls.lock().push("single_phase_commit");
        enlistment.committed();
        Ok(())
    }
}

/// Enlistment that records reported outcomes
#[derive(Default)]
pub(crate) struct FakeEnlistment {
    outcomes: Mutex<Vec<&'static str>>,
}

impl FakeEnlistment {
    pub(crate) fn outcomes(&self) -> Vec<&'static str> {
        self.outcomes.lock().clone()
    }
}

impl SinglePhaseEnlistment for FakeEnlistment {
    fn committed(&self) {
        self.outcomes.lock().push("committed");
    }

    fn aborted(&self, _reason: Option<&str>) {
        self.outcomes.lock().push("aborted");
    }

    fn in_doubt(&self) {
        self.outcomes.lock().push("in_doubt");
    }
}
