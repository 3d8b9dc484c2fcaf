//! Error types for the alert client.
//!
//! `BleError` covers every way a scan or GATT attempt can stop short of a
//! subscription. Its `Display` text is what ends up on the status line, so
//! keep the messages short. Application plumbing uses `anyhow`.

use thiserror::Error;

/// Raw status value reported by the BLE stack for a failed operation.
pub type StatusCode = u8;

/// Errors that end the current scan or connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("Bluetooth permissions not granted")]
    PermissionDenied,

    #[error("Scanner unavailable")]
    ScannerUnavailable,

    #[error("Scan failed: {0}")]
    ScanFailed(StatusCode),

    #[error("GATT error: {0}")]
    ConnectionFailed(StatusCode),

    #[error("Service not found")]
    ServiceNotFound,

    #[error("Characteristic not found")]
    CharacteristicNotFound,

    #[error("CCCD not found")]
    DescriptorNotFound,

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(StatusCode),

    #[error("Disconnected")]
    PeerDisconnected,

    /// A connection is already live; it has to be closed before a new one starts.
    #[error("A session is already active")]
    SessionActive,
}

impl BleError {
    /// Connection-level errors close the session, discovery-level ones leave it open.
    pub fn closes_session(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::PeerDisconnected)
    }
}
