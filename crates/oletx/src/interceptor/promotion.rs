//! Promotion interceptor
//!
//! Takes over promotable enlistments that ask for the native coordinator
//! promoter. The marker swap at enlistment is irrevocable: once a
//! transaction carries the bridge's marker, export-cookie and
//! native-transaction requests for it are always served through the
//! transaction manager facade and never fall back to the native path.

use std::sync::Arc;

use tracing::{debug, trace};

use super::delegated::DelegatedNotification;
use super::host::{HostTransaction, PromotableEnlistment, PromoterType};
use super::registry::{Intercept, TransactionInterceptor};
use crate::error::{OletxError, Result};
use crate::manager::TransactionManager;
use crate::shim::NativeTransaction;

/// Interceptor routing promoted transactions through the facade
#[derive(Debug)]
pub struct PromotionInterceptor {
    manager: Arc<TransactionManager>,
    marker: PromoterType,
}

impl PromotionInterceptor {
    /// Create an interceptor stamping `marker` on the transactions it claims
    pub fn new(manager: Arc<TransactionManager>, marker: PromoterType) -> Self {
        Self { manager, marker }
    }

    /// Marker identifying claimed transactions
    pub fn marker(&self) -> PromoterType {
        self.marker
    }

    fn claims(&self, transaction: &dyn HostTransaction) -> bool {
        transaction.promoter_type() == Some(self.marker)
    }
}

impl TransactionInterceptor for PromotionInterceptor {
    fn enlist_promotable(
        &self,
        transaction: &Arc<dyn HostTransaction>,
        enlistment: PromotableEnlistment,
    ) -> PromotableEnlistment {
        if enlistment.promoter_type != PromoterType::DTC {
            return enlistment;
        }

        debug!(
            "Claiming promotable enlistment: {} -> {}",
            enlistment.promoter_type, self.marker
        );
        let delegated = DelegatedNotification::new(transaction, enlistment.notification);
        PromotableEnlistment::new(Arc::new(delegated), self.marker)
    }

    fn export_cookie(
        &self,
        transaction: &dyn HostTransaction,
        whereabouts: &[u8],
    ) -> Result<Intercept<Option<Vec<u8>>>> {
        if !self.claims(transaction) {
            return Ok(Intercept::Defer);
        }

        let Some(token) = transaction.promoted_token().map_err(OletxError::promotion)? else {
            trace!("Claimed transaction has no promoted token");
            return Ok(Intercept::Replaced(None));
        };

        let cookie = self
            .manager
            .get_export_cookie(&token, whereabouts)
            .map_err(OletxError::promotion)?;
        Ok(Intercept::Replaced(Some(cookie)))
    }

    fn native_transaction(
        &self,
        transaction: &dyn HostTransaction,
    ) -> Result<Intercept<Option<Box<dyn NativeTransaction>>>> {
        if !self.claims(transaction) {
            return Ok(Intercept::Defer);
        }

        let Some(token) = transaction.promoted_token().map_err(OletxError::promotion)? else {
            trace!("Claimed transaction has no promoted token");
            return Ok(Intercept::Replaced(None));
        };

        let native = self
            .manager
            .get_native_transaction(&token)
            .map_err(OletxError::promotion)?;
        Ok(Intercept::Replaced(Some(native)))
    }
}
