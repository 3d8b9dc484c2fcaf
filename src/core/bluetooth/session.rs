//! GATT session state machine
//!
//! The session owns the single connection to the alert peripheral. Requests
//! go out through a [`GattLink`]; their completions come back as
//! [`SessionEvent`]s and are applied one at a time by [`GattSession::handle_event`].
//! The next GATT request is only issued from the completion of the previous
//! one, so the link never sees two outstanding operations.

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::constants::{ENABLE_NOTIFICATION_VALUE, GATT_ERROR};
use crate::core::bluetooth::events::{EventSink, GattEvent, GattStatus, LinkState, SessionEvent};
use crate::core::bluetooth::notification::NotificationRouter;
use crate::core::bluetooth::types::{
    CharacteristicRef, DescriptorRef, DiscoveredService, SessionState, SubscriptionState, TargetSpec,
};
use crate::core::ports::{PermissionGate, StatusSink};
use crate::error::BleError;

/// Request side of a GATT connection.
///
/// Methods return immediately. Asynchronous outcomes are posted to the
/// `EventSink` handed over in `connect`.
pub trait GattLink: Send + Sync + 'static {
    type Device: Clone + fmt::Debug + Send + Sync + 'static;

    /// Opens a connection and reports `ConnectionStateChanged`.
    fn connect(&self, device: &Self::Device, events: EventSink);

    /// Runs service discovery and reports `ServicesDiscovered`.
    fn discover_services(&self);

    /// Turns local delivery of value changes on or off. Returns false if
    /// the request was refused.
    fn set_characteristic_notification(&self, characteristic: &CharacteristicRef, enable: bool) -> bool;

    /// Writes a descriptor and reports `DescriptorWritten`. Returns false if
    /// the write could not be issued.
    fn write_descriptor(&self, descriptor: &DescriptorRef, value: &[u8]) -> bool;

    /// Releases the connection. Later completions from this connection may
    /// still arrive and must be ignored by the caller.
    fn close(&self);
}

/// The live (or last) connection
#[derive(Debug)]
struct Session<D> {
    device: D,
    state: SessionState,
    characteristic: Option<CharacteristicRef>,
    subscription: SubscriptionState,
    last_error: Option<BleError>,
}

/// Read-only view of the session, for status queries and tests
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub state: SessionState,
    pub characteristic: Option<CharacteristicRef>,
    pub subscription: SubscriptionState,
    pub last_error: Option<BleError>,
}

pub struct GattSession<L: GattLink> {
    link: Arc<L>,
    target: TargetSpec,
    gate: Arc<dyn PermissionGate>,
    status: Arc<dyn StatusSink>,
    router: NotificationRouter,
    events: mpsc::UnboundedSender<SessionEvent>,
    generation: u64,
    session: Option<Session<L::Device>>,
}

impl<L: GattLink> GattSession<L> {
    pub fn new(
        link: Arc<L>,
        target: TargetSpec,
        gate: Arc<dyn PermissionGate>,
        status: Arc<dyn StatusSink>,
        router: NotificationRouter,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            link,
            target,
            gate,
            status,
            router,
            events,
            generation: 0,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.as_ref().map_or(SessionState::Idle, |s| s.state)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            generation: self.generation,
            state: self.state(),
            characteristic: self.session.as_ref().and_then(|s| s.characteristic),
            subscription: self
                .session
                .as_ref()
                .map_or(SubscriptionState::Inactive, |s| s.subscription),
            last_error: self.session.as_ref().and_then(|s| s.last_error.clone()),
        }
    }

    /// Starts a connection to `device`.
    ///
    /// Rejected while another session is live; the existing handle is never
    /// replaced in place.
    pub fn connect(&mut self, device: L::Device) -> Result<(), BleError> {
        if !self.gate.has_required_capabilities() {
            self.gate.request_capabilities_if_needed();
            return Err(self.report(BleError::PermissionDenied));
        }
        if self.state().is_live() {
            warn!("Connect to {:?} rejected, session in state {:?}", device, self.state());
            return Err(self.report(BleError::SessionActive));
        }

        self.generation += 1;
        info!("Connecting to {:?} (session {})", device, self.generation);
        let sink = EventSink::new(self.generation, self.events.clone());
        self.link.connect(&device, sink);
        self.session = Some(Session {
            device,
            state: SessionState::Connecting,
            characteristic: None,
            subscription: SubscriptionState::Inactive,
            last_error: None,
        });
        self.status.set_status("Connecting...");
        Ok(())
    }

    /// Releases the connection. Safe to call in any state, any number of times.
    pub fn close(&mut self) {
        let Some(session) = self.session.as_mut() else {
            debug!("Close requested with no session");
            return;
        };
        if session.state == SessionState::Closed {
            debug!("Session {} already closed", self.generation);
            return;
        }
        info!("Closing session {} with {:?}", self.generation, session.device);
        session.state = SessionState::Closed;
        self.link.close();
        self.status.set_status("Disconnected");
    }

    /// Applies one completion from the link.
    pub fn handle_event(&mut self, event: SessionEvent) {
        if event.generation != self.generation {
            debug!(
                "Dropping stale event from session {} (current {}): {:?}",
                event.generation, self.generation, event.event
            );
            return;
        }
        match self.state() {
            SessionState::Idle | SessionState::Closed => {
                debug!("Dropping event for closed session: {:?}", event.event);
                return;
            }
            _ => {}
        }

        match event.event {
            GattEvent::ConnectionStateChanged { status, state } => self.on_connection_state_change(status, state),
            GattEvent::ServicesDiscovered { status, services } => self.on_services_discovered(status, &services),
            GattEvent::DescriptorWritten { status } => self.on_descriptor_write(status),
            GattEvent::CharacteristicChanged { characteristic, value } => {
                self.on_characteristic_changed(characteristic, &value)
            }
        }
    }

    fn on_connection_state_change(&mut self, status: GattStatus, state: LinkState) {
        if let GattStatus::Failure(code) = status {
            error!("Connection state change failed with status {}", code);
            self.fail(BleError::ConnectionFailed(code));
            return;
        }
        match state {
            LinkState::Connected => {
                if self.state() != SessionState::Connecting {
                    debug!("Ignoring repeated connect in state {:?}", self.state());
                    return;
                }
                self.set_state(SessionState::Connected);
                self.status.set_status("Connected. Discovering services...");
                self.set_state(SessionState::DiscoveringServices);
                self.link.discover_services();
            }
            LinkState::Disconnected => {
                info!("Peer disconnected");
                self.fail(BleError::PeerDisconnected);
            }
        }
    }

    fn on_services_discovered(&mut self, status: GattStatus, services: &[DiscoveredService]) {
        if self.state() != SessionState::DiscoveringServices {
            debug!("Ignoring service discovery result in state {:?}", self.state());
            return;
        }
        match status {
            GattStatus::Success => self.status.set_status("Services discovered"),
            GattStatus::Failure(code) => {
                self.status.set_status(&format!("Discovery failed (service): {}", code));
            }
        }
        for service in services {
            debug!("Discovered service: {}", service.uuid);
        }

        let Some(service) = services.iter().find(|s| s.uuid == self.target.service_id) else {
            self.fail(BleError::ServiceNotFound);
            return;
        };
        info!("Found alert service: {}", service.uuid);
        self.set_state(SessionState::ServiceFound);

        let Some(characteristic) = service.characteristic(self.target.characteristic_id) else {
            self.fail(BleError::CharacteristicNotFound);
            return;
        };
        info!("Found alert characteristic: {}", characteristic.uuid);
        let char_ref = CharacteristicRef {
            service: service.uuid,
            characteristic: characteristic.uuid,
        };
        if let Some(session) = self.session.as_mut() {
            session.characteristic = Some(char_ref);
        }
        self.set_state(SessionState::CharFound);

        if self.link.set_characteristic_notification(&char_ref, true) {
            self.status.set_status("Notifications enabled");
        } else {
            warn!("Local notification delivery refused for {}", char_ref.characteristic);
        }

        if !characteristic.has_descriptor(self.target.notification_descriptor_id) {
            self.fail(BleError::DescriptorNotFound);
            return;
        }

        let cccd = DescriptorRef {
            characteristic: char_ref,
            descriptor: self.target.notification_descriptor_id,
        };
        self.set_state(SessionState::EnablingNotifications);
        self.set_subscription(SubscriptionState::Pending);
        let issued = self.link.write_descriptor(&cccd, &ENABLE_NOTIFICATION_VALUE);
        self.status.set_status(&format!("Enabling notifications... {}", issued));
        if !issued {
            self.set_subscription(SubscriptionState::Failed);
            self.fail(BleError::SubscriptionFailed(GATT_ERROR));
        }
    }

    fn on_descriptor_write(&mut self, status: GattStatus) {
        if self.state() != SessionState::EnablingNotifications {
            debug!("Ignoring descriptor write in state {:?}", self.state());
            return;
        }
        match status {
            GattStatus::Success => {
                self.set_subscription(SubscriptionState::Subscribed);
                self.set_state(SessionState::Subscribed);
                info!("Subscribed to alert notifications");
                self.status.set_status("Subscribed");
            }
            GattStatus::Failure(code) => {
                self.set_subscription(SubscriptionState::Failed);
                self.fail(BleError::SubscriptionFailed(code));
            }
        }
    }

    fn on_characteristic_changed(&mut self, characteristic: Uuid, value: &[u8]) {
        // Delivery is enabled locally before the CCCD write is acknowledged.
        let delivering = matches!(
            self.state(),
            SessionState::EnablingNotifications | SessionState::Subscribed
        );
        if !delivering {
            debug!("Dropping value change in state {:?}", self.state());
            return;
        }
        self.router.on_message(characteristic, value);
    }

    /// Stops progressing. Connection-level errors also release the handle;
    /// discovery-level ones leave the connection open.
    fn fail(&mut self, err: BleError) {
        let closes = err.closes_session();
        if let Some(session) = self.session.as_mut() {
            session.last_error = Some(err.clone());
            if closes {
                session.state = SessionState::Closed;
            }
        }
        if closes {
            self.link.close();
        } else {
            warn!("Session {} halted: {}", self.generation, err);
        }
        self.report(err);
    }

    fn report(&self, err: BleError) -> BleError {
        self.status.set_status(&err.to_string());
        err
    }

    fn set_state(&mut self, state: SessionState) {
        if let Some(session) = self.session.as_mut() {
            debug!("Session {}: {:?} -> {:?}", self.generation, session.state, state);
            session.state = state;
        }
    }

    fn set_subscription(&mut self, subscription: SubscriptionState) {
        if let Some(session) = self.session.as_mut() {
            session.subscription = subscription;
        }
    }
}
