//! Bridge assembly
//!
//! Owns the process-wide pieces of the bridge: one handle table, one proxy
//! session, the transaction manager facade over it and the promotion
//! interceptor that routes promoted transactions to the facade.

use std::sync::Arc;

use tracing::info;

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::handle_table::HandleTable;
use crate::interceptor::{InterceptionRegistry, PromoterType, PromotionInterceptor};
use crate::manager::TransactionManager;
use crate::session::ProxySession;
use crate::shim::ProxyShimFactory;

/// Distributed transaction propagation bridge
#[derive(Debug)]
pub struct OletxBridge {
    config: BridgeConfig,
    handles: Arc<HandleTable>,
    session: Arc<ProxySession>,
    manager: Arc<TransactionManager>,
    interceptor: Arc<PromotionInterceptor>,
}

impl OletxBridge {
    /// Assemble a bridge over a proxy shim factory
    ///
    /// Nothing is sent to the proxy until the first import or export. Fails
    /// when the configured marker is the native coordinator's promoter type.
    pub fn new(config: BridgeConfig, factory: Arc<dyn ProxyShimFactory>) -> Result<Self> {
        config.validate()?;

        let handles = Arc::new(HandleTable::new());
        let session = Arc::new(ProxySession::new(factory, handles.clone(), config.node_name.clone()));
        let manager = Arc::new(TransactionManager::new(session.clone()));
        let interceptor = Arc::new(PromotionInterceptor::new(manager.clone(), config.promoter_type));

        Ok(Self {
            config,
            handles,
            session,
            manager,
            interceptor,
        })
    }

    /// Route the host runtime's entry points through this bridge
    pub fn install(&self, registry: &InterceptionRegistry) {
        registry.install_all(self.interceptor.clone());
        info!(
            "Promotion bridge installed (marker {}, node {:?})",
            self.config.promoter_type, self.config.node_name
        );
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn promoter_type(&self) -> PromoterType {
        self.config.promoter_type
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    pub fn session(&self) -> &Arc<ProxySession> {
        &self.session
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn interceptor(&self) -> &Arc<PromotionInterceptor> {
        &self.interceptor
    }

    /// Drain outcome notifications queued by the proxy
    ///
    /// Every import keeps an outcome handle bound until its outcome
    /// notification is processed here, so the host must call this
    /// periodically or the handle table grows with each export.
    pub fn process_notifications(&self) -> Result<usize> {
        self.session.process_notifications()
    }
}
