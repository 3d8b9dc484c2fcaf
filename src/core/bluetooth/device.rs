//! Bluetooth device representation and related functionality

use std::collections::HashSet;

use uuid::Uuid;

use crate::core::bluetooth::types::TargetSpec;

/// One advertisement seen while scanning
#[derive(Debug, Clone)]
pub struct ScanCandidate<D> {
    /// Platform handle for the advertising device
    pub device: D,
    /// Address or platform id, used for status text when the name is missing
    pub address: String,
    /// The advertised name of the device, if available
    pub name: Option<String>,
    /// Service UUIDs listed in the advertisement
    pub services: HashSet<Uuid>,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
}

impl<D> ScanCandidate<D> {
    /// Creates a new ScanCandidate instance
    pub fn new(
        device: D,
        address: String,
        name: Option<String>,
        services: impl IntoIterator<Item = Uuid>,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            device,
            address,
            name,
            services: services.into_iter().collect(),
            rssi,
        }
    }

    /// Returns true if this advertisement belongs to the target peripheral.
    ///
    /// Either the name or the service UUID is enough on its own; a peripheral
    /// does not have to advertise both.
    pub fn matches(&self, target: &TargetSpec) -> bool {
        let name_match = self.name.as_deref() == Some(target.name.as_str());
        let service_match = self.services.contains(&target.service_id);
        name_match || service_match
    }

    /// Returns true when the signal is known to be weaker than `min_rssi`
    pub fn is_below(&self, min_rssi: Option<i16>) -> bool {
        match (self.rssi, min_rssi) {
            (Some(rssi), Some(floor)) => rssi < floor,
            _ => false,
        }
    }

    /// Name for status text, falling back to the address
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}
