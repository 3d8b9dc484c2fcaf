//! Bluetooth functionality for the alert client
//! This module handles scanning for the alert peripheral, the GATT session
//! that subscribes to its alert characteristic, and routing notifications.

mod connection;
mod constants;
mod device;
mod events;
mod manager;
mod notification;
mod scanner;
mod session;
mod types;

// Re-export types that should be publicly accessible
pub use connection::BluestLink;
pub use constants::*; // Re-export all constants
pub use device::ScanCandidate;
pub use events::{EventSink, GattEvent, GattStatus, LinkState, SessionEvent};
pub use manager::BluetoothManager;
pub use notification::{InboundMessage, NotificationRouter};
pub use scanner::{AdvertisementSource, BluestAdvertisements, BluetoothScanner};
pub use session::{GattLink, GattSession, SessionSnapshot};
pub use types::{
    CharacteristicRef, DescriptorRef, DiscoveredCharacteristic, DiscoveredService, SessionState, SubscriptionState,
    TargetSpec,
};
