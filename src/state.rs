//! Application state management
//! This module wires the Bluetooth manager to the desktop collaborators.

use std::sync::Arc;

use anyhow::Result;
use bluest::Adapter;
use log::{info, warn};
use tokio::sync::{Mutex, watch};

use crate::config::AppConfig;
use crate::core::bluetooth::{BluestAdvertisements, BluestLink, BluetoothManager};
use crate::core::ports::Collaborators;
use crate::platform::{AdapterPermissionGate, CommandCallAction, LogAlertSink, WatchStatusSink};

pub type AlertManager = BluetoothManager<BluestAdvertisements, BluestLink>;

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    /// The Bluetooth manager instance
    pub bluetooth_manager: Arc<Mutex<AlertManager>>,
    /// Latest status line
    pub status: watch::Receiver<String>,
}

impl AppState {
    /// Creates a new AppState instance. A missing adapter is not an error:
    /// scanning then reports the scanner as unavailable.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing BluetoothManager...");
        let adapter = Adapter::default().await;
        if adapter.is_none() {
            warn!("No Bluetooth adapter found");
        }

        let (status_sink, status) = WatchStatusSink::new();
        let collaborators = Collaborators {
            gate: Arc::new(AdapterPermissionGate::probe(adapter.clone()).await),
            status: Arc::new(status_sink),
            alerts: Arc::new(LogAlertSink),
            calls: Arc::new(CommandCallAction::new(config.call.clone())),
        };

        let manager = BluetoothManager::new(
            adapter.clone().map(BluestAdvertisements::new),
            Arc::new(BluestLink::new(adapter)),
            config.target.to_target_spec(),
            collaborators,
            config.scan.min_rssi,
        );

        Ok(Self {
            config,
            bluetooth_manager: Arc::new(Mutex::new(manager)),
            status,
        })
    }

    /// Gets a reference to the Bluetooth manager
    pub fn get_bluetooth_manager_arc(&self) -> Arc<Mutex<AlertManager>> {
        self.bluetooth_manager.clone()
    }
}
