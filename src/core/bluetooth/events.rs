//! Asynchronous GATT completions delivered to the session.
//!
//! Every completion the BLE stack reports is one `GattEvent` variant. Events
//! are tagged with the generation of the connection that produced them so the
//! session can drop anything left over from a closed connection.

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::types::DiscoveredService;
use crate::error::StatusCode;

/// Outcome of a GATT operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure(StatusCode),
}

/// Link layer state reported with a connection change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Completions produced by a GATT link
#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    ConnectionStateChanged { status: GattStatus, state: LinkState },
    ServicesDiscovered { status: GattStatus, services: Vec<DiscoveredService> },
    DescriptorWritten { status: GattStatus },
    CharacteristicChanged { characteristic: Uuid, value: Vec<u8> },
}

/// A `GattEvent` stamped with the connection generation that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub generation: u64,
    pub event: GattEvent,
}

/// Handle a link uses to report completions for one connection.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues an event for the session. A closed queue means the client is
    /// shutting down, so the event is dropped.
    pub fn post(&self, event: GattEvent) {
        let event = SessionEvent { generation: self.generation, event };
        if let Err(e) = self.tx.send(event) {
            debug!("Session queue closed, dropping {:?}", e.0.event);
        }
    }
}
