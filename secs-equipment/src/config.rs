//! Equipment server configuration

use hsms_session::HsmsConfig;
use secs_core::SecsResult;
use secs_gem::manager::{DEFAULT_MODEL_NAME, DEFAULT_SOFTWARE_REVISION};
use serde::{Deserialize, Serialize};

/// Equipment server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentConfig {
    /// Listen address as `host:port`
    pub bind_address: String,
    /// Session settings; the mode is always passive
    pub hsms: HsmsConfig,
    /// MDLN reported in S1F2 and S1F14
    pub model_name: String,
    /// SOFTREV reported in S1F2 and S1F14
    pub software_revision: String,
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            hsms: HsmsConfig::passive(0),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            software_revision: DEFAULT_SOFTWARE_REVISION.to_string(),
        }
    }
}

impl EquipmentConfig {
    pub fn new(bind_address: &str) -> Self {
        Self {
            bind_address: bind_address.to_string(),
            ..Self::default()
        }
    }

    pub fn with_hsms(mut self, hsms: HsmsConfig) -> Self {
        self.hsms = hsms;
        self
    }

    pub fn with_identity(mut self, model_name: &str, software_revision: &str) -> Self {
        self.model_name = model_name.to_string();
        self.software_revision = software_revision.to_string();
        self
    }

    /// # Errors
    /// Returns `SecsError::InvalidData` if the session settings are invalid
    pub fn validate(&self) -> SecsResult<()> {
        self.hsms.validate()
    }
}
