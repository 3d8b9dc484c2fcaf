//! Defines shared data structures for the Bluetooth module.

use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::constants::UUID_CCCD;

/// Identity of the peripheral the client looks for.
/// Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    /// Advertised local name of the peripheral
    pub name: String,
    /// Service that carries the alert characteristic
    pub service_id: Uuid,
    /// Characteristic delivering alert notifications
    pub characteristic_id: Uuid,
    /// Descriptor written to turn notifications on
    pub notification_descriptor_id: Uuid,
}

impl TargetSpec {
    /// Creates a target using the standard CCCD as notification descriptor
    pub fn new(name: impl Into<String>, service_id: Uuid, characteristic_id: Uuid) -> Self {
        Self {
            name: name.into(),
            service_id,
            characteristic_id,
            notification_descriptor_id: UUID_CCCD,
        }
    }
}

/// Addresses a characteristic inside the discovered attribute table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Addresses a descriptor of a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRef {
    pub characteristic: CharacteristicRef,
    pub descriptor: Uuid,
}

/// A characteristic as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

/// A service as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

impl DiscoveredCharacteristic {
    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

/// Progress of the GATT session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    DiscoveringServices,
    ServiceFound,
    CharFound,
    EnablingNotifications,
    Subscribed,
    Closed,
}

impl SessionState {
    /// Closed and Idle sessions hold no connection handle.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Idle | Self::Closed)
    }
}

/// Where the notification subscription stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionState {
    /// Nothing requested yet
    Inactive,
    /// Local delivery is on, the CCCD write is outstanding
    Pending,
    /// The peer acknowledged the CCCD write
    Subscribed,
    /// The CCCD write was rejected or could not be issued
    Failed,
}
