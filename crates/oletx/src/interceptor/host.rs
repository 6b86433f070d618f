//! Host transaction runtime surface seen by the interceptor

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;

/// Marker identifying which promoter a promotable enlistment uses
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromoterType(pub Uuid);

impl PromoterType {
    /// Native coordinator promoter type
    pub const DTC: PromoterType = PromoterType(Uuid::from_u128(0x14229753_ffe1_428d_82b7_df73045cb8da));

    /// Promoter type stamped on transactions this bridge takes over
    pub const NON_MSDTC: PromoterType =
        PromoterType(Uuid::from_u128(0x12ddadb4_dea6_4dea_a32a_51e8d9570b4e));

    /// Create a promoter type from its GUID
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying GUID
    pub fn uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for PromoterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromoterType({})", self.0)
    }
}

impl fmt::Display for PromoterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction object owned by the host runtime
pub trait HostTransaction: Send + Sync {
    /// Promoter type recorded when the promotable enlistment was registered
    fn promoter_type(&self) -> Option<PromoterType>;

    /// Propagation token of the promoted transaction, promoting it first if needed
    fn promoted_token(&self) -> Result<Option<Vec<u8>>>;

    /// Publish the distributed transaction identifier
    fn set_distributed_identifier(&self, transaction_id: Uuid) -> Result<()>;
}

/// Outcome callback handed to a single-phase commit or rollback
pub trait SinglePhaseEnlistment: Send + Sync {
    fn committed(&self);
    fn aborted(&self, reason: Option<&str>);
    fn in_doubt(&self);
}

/// Promotable single-phase notification supplied by a resource
pub trait PromotableNotification: Send + Sync {
    /// The enlistment was registered
    fn initialize(&self) -> Result<()>;

    /// Promote to a distributed transaction, returning its propagation token
    fn promote(&self) -> Result<Vec<u8>>;

    /// Roll back the local transaction
    fn rollback(&self, enlistment: &dyn SinglePhaseEnlistment) -> Result<()>;

    /// Commit the local transaction in a single phase
    fn single_phase_commit(&self, enlistment: &dyn SinglePhaseEnlistment) -> Result<()>;
}

/// Arguments of a promotable enlistment registration
#[derive(Clone)]
pub struct PromotableEnlistment {
    pub notification: Arc<dyn PromotableNotification>,
    pub promoter_type: PromoterType,
}

impl PromotableEnlistment {
    pub fn new(notification: Arc<dyn PromotableNotification>, promoter_type: PromoterType) -> Self {
        Self {
            notification,
            promoter_type,
        }
    }
}

impl fmt::Debug for PromotableEnlistment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromotableEnlistment")
            .field("promoter_type", &self.promoter_type)
            .finish_non_exhaustive()
    }
}
