//! Interfaces to the collaborators that live outside the BLE core.
//!
//! All calls are fire-and-forget: the core never waits on or reads back
//! anything from these.

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Platform capabilities needed before scanning or connecting
#[cfg_attr(test, automock)]
pub trait PermissionGate: Send + Sync {
    fn has_required_capabilities(&self) -> bool;

    /// Asks the platform for missing capabilities. The outcome is only
    /// observable through later `has_required_capabilities` calls.
    fn request_capabilities_if_needed(&self);
}

/// Shows a user-visible alert
#[cfg_attr(test, automock)]
pub trait AlertSink: Send + Sync {
    fn display(&self, title: &str, message: &str, urgent: bool);
}

/// Places or opens a call to a phone number
#[cfg_attr(test, automock)]
pub trait CallAction: Send + Sync {
    fn initiate(&self, phone_number: &str);
}

/// Receives a one-line summary after every transition and error
#[cfg_attr(test, automock)]
pub trait StatusSink: Send + Sync {
    fn set_status(&self, text: &str);
}

/// The set of collaborators handed to the Bluetooth manager
#[derive(Clone)]
pub struct Collaborators {
    pub gate: Arc<dyn PermissionGate>,
    pub status: Arc<dyn StatusSink>,
    pub alerts: Arc<dyn AlertSink>,
    pub calls: Arc<dyn CallAction>,
}
