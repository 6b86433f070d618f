//! Promotion interception
//!
//! The host transaction runtime exposes three seams: registering a
//! promotable enlistment, producing an export cookie and producing the
//! native transaction object. The [`InterceptionRegistry`] routes those
//! seams to a [`TransactionInterceptor`]; the [`PromotionInterceptor`]
//! claims enlistments for the native coordinator promoter and serves the
//! other two seams through the transaction manager facade.
//!
//! ```text
//! enlist(P, M_native) ──► enlist(Delegated(P), M_bridge)
//!                                 │ promote()
//!                                 ▼
//!                   P.promote() → token → publish id(token)
//!
//! export_cookie(tx, w) ──► M_bridge? ─yes─► facade.get_export_cookie(token, w)
//!                                   └─no──► native path
//! ```

mod delegated;
mod host;
mod promotion;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use delegated::{DelegatedNotification, PromotionState};
pub use host::{
    HostTransaction, PromotableEnlistment, PromotableNotification, PromoterType,
    SinglePhaseEnlistment,
};
pub use promotion::PromotionInterceptor;
pub use registry::{EntryPoint, Intercept, InterceptionRegistry, TransactionInterceptor};
