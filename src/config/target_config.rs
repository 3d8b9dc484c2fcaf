use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::{DEFAULT_TARGET_NAME, TargetSpec, UUID_ALERT_CHAR, UUID_ALERT_SERVICE};

/// Identity of the alert peripheral
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Advertised local name of the peripheral
    pub device_name: String,
    /// Service carrying the alert characteristic
    pub service_uuid: Uuid,
    /// Characteristic that notifies alerts
    pub characteristic_uuid: Uuid,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            device_name: DEFAULT_TARGET_NAME.to_string(),
            service_uuid: UUID_ALERT_SERVICE,
            characteristic_uuid: UUID_ALERT_CHAR,
        }
    }
}

impl TargetConfig {
    /// The CCCD is a protocol constant and is never configured.
    pub fn to_target_spec(&self) -> TargetSpec {
        TargetSpec::new(self.device_name.clone(), self.service_uuid, self.characteristic_uuid)
    }
}
