use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Start scanning as soon as the client is up
    pub auto_start: bool,
    /// Skip advertisements weaker than this RSSI (dBm). `None` accepts all.
    pub min_rssi: Option<i16>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            auto_start: true,
            min_rssi: None,
        }
    }
}
