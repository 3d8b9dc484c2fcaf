//! Core functionality for the alert client
//! This module contains the BLE central and the ports it talks through.

pub mod bluetooth;
pub mod ports;

// Re-export commonly used types
pub use bluetooth::BluetoothManager;
pub use ports::{AlertSink, CallAction, Collaborators, PermissionGate, StatusSink};
