//! Bridge configuration

use crate::error::{OletxError, Result};
use crate::PromoterType;

/// Configuration for the propagation bridge
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Node name passed to the proxy; empty selects the local coordinator
    pub node_name: String,
    /// Promoter marker stamped on transactions the bridge takes over
    pub promoter_type: PromoterType,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            promoter_type: PromoterType::NON_MSDTC,
        }
    }
}

impl BridgeConfig {
    /// Create a configuration for the local coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node name sent on connect
    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    /// Set the promoter marker
    pub fn promoter_type(mut self, promoter_type: PromoterType) -> Self {
        self.promoter_type = promoter_type;
        self
    }

    /// Check that the marker cannot be confused with native promotion
    pub fn validate(&self) -> Result<()> {
        if self.promoter_type == PromoterType::DTC {
            return Err(OletxError::InvalidConfig(format!(
                "promoter type {} is the native coordinator's marker",
                self.promoter_type
            )));
        }
        Ok(())
    }
}
