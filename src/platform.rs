//! Desktop implementations of the collaborator ports

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bluest::{Adapter, AdapterEvent};
use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::call_config::CallConfig;
use crate::core::ports::{AlertSink, CallAction, PermissionGate, StatusSink};

/// How long the startup probe waits for the adapter to report ready
const AVAILABILITY_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Treats a powered, usable adapter as the required capability
pub struct AdapterPermissionGate {
    adapter: Option<Adapter>,
    available: Arc<AtomicBool>,
    waiting: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl AdapterPermissionGate {
    /// Probes the adapter once so the first check has an answer, then keeps
    /// the answer current from the adapter's power events.
    pub async fn probe(adapter: Option<Adapter>) -> Self {
        let ready = match &adapter {
            Some(adapter) => match tokio::time::timeout(AVAILABILITY_PROBE_TIMEOUT, adapter.wait_available()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!("Could not query adapter availability: {}", e);
                    false
                }
                Err(_) => false,
            },
            None => false,
        };
        info!("Bluetooth adapter available: {}", ready);

        let available = Arc::new(AtomicBool::new(ready));
        let watcher = adapter.clone().map(|adapter| {
            let available = available.clone();
            tokio::spawn(async move {
                match adapter.events().await {
                    Ok(events) => track_availability(events, &available).await,
                    Err(e) => warn!("Cannot watch adapter events: {}", e),
                }
            })
        });

        Self {
            adapter,
            available,
            waiting: Arc::new(AtomicBool::new(false)),
            watcher,
        }
    }
}

impl Drop for AdapterPermissionGate {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Mirrors adapter power events into `available` until the stream ends
async fn track_availability<S>(mut events: S, available: &AtomicBool)
where
    S: Stream<Item = bluest::Result<AdapterEvent>> + Unpin,
{
    while let Some(event) = events.next().await {
        match event {
            Ok(AdapterEvent::Available) => {
                info!("Bluetooth adapter is available");
                available.store(true, Ordering::SeqCst);
            }
            Ok(AdapterEvent::Unavailable) => {
                warn!("Bluetooth adapter became unavailable");
                available.store(false, Ordering::SeqCst);
            }
            Err(e) => error!("Adapter event error: {}", e),
        }
    }
    debug!("Adapter event stream ended");
}

impl PermissionGate for AdapterPermissionGate {
    fn has_required_capabilities(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn request_capabilities_if_needed(&self) {
        if self.has_required_capabilities() {
            return;
        }
        let Some(adapter) = self.adapter.clone() else {
            warn!("No Bluetooth adapter present");
            return;
        };
        if self.waiting.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Waiting for the Bluetooth adapter to become available...");

        let available = self.available.clone();
        let waiting = self.waiting.clone();
        tokio::spawn(async move {
            match adapter.wait_available().await {
                Ok(()) => {
                    info!("Bluetooth adapter is now available");
                    available.store(true, Ordering::SeqCst);
                }
                Err(e) => error!("Waiting for adapter failed: {}", e),
            }
            waiting.store(false, Ordering::SeqCst);
        });
    }
}

/// Prints alerts to the console
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn display(&self, title: &str, message: &str, urgent: bool) {
        if urgent {
            warn!("{}: {}", title, message);
        } else {
            info!("{}: {}", title, message);
        }
        println!("\x07*** {} ***\n{}", title, message);
    }
}

/// Runs the configured command for each call request
pub struct CommandCallAction {
    config: CallConfig,
}

impl CommandCallAction {
    pub fn new(config: CallConfig) -> Self {
        Self { config }
    }
}

impl CallAction for CommandCallAction {
    fn initiate(&self, phone_number: &str) {
        if !self.config.enabled {
            info!("Calls are disabled, not calling {}", phone_number);
            return;
        }
        let Some((program, args)) = self.config.command_for(phone_number) else {
            warn!("No call command configured");
            return;
        };

        info!("Calling {} via {} {:?}", phone_number, program, args);
        let spawned = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) if !status.success() => warn!("Call command exited with {}", status),
                        Ok(_) => {}
                        Err(e) => error!("Call command failed: {}", e),
                    }
                });
            }
            Err(e) => error!("Failed to start call command {}: {}", program, e),
        }
    }
}

/// Publishes the latest status line on a watch channel
pub struct WatchStatusSink {
    tx: watch::Sender<String>,
}

impl WatchStatusSink {
    pub fn new() -> (Self, watch::Receiver<String>) {
        let (tx, rx) = watch::channel(String::new());
        (Self { tx }, rx)
    }
}

impl StatusSink for WatchStatusSink {
    fn set_status(&self, text: &str) {
        info!("Status: {}", text);
        self.tx.send_replace(text.to_string());
    }
}
