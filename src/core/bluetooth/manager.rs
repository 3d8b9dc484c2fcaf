//! Bluetooth manager for the alert client
//! This module provides the main interface for bluetooth operations

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::core::bluetooth::constants::{ALERT_TITLE, DEFAULT_ALERT_MESSAGE};
use crate::core::bluetooth::events::SessionEvent;
use crate::core::bluetooth::notification::NotificationRouter;
use crate::core::bluetooth::scanner::{AdvertisementSource, BluetoothScanner};
use crate::core::bluetooth::session::{GattLink, GattSession, SessionSnapshot};
use crate::core::bluetooth::types::TargetSpec;
use crate::core::ports::{AlertSink, Collaborators, StatusSink};
use crate::error::BleError;

/// Manages Bluetooth operations
pub struct BluetoothManager<A, L>
where
    A: AdvertisementSource,
    L: GattLink<Device = A::Device>,
{
    /// The peripheral we are looking for
    target: TargetSpec,
    /// Bluetooth scanner
    scanner: BluetoothScanner<A>,
    /// The single GATT session, shared with the event loop
    session: Arc<Mutex<GattSession<L>>>,
    status: Arc<dyn StatusSink>,
    alerts: Arc<dyn AlertSink>,
    /// Applies scan matches and GATT events one at a time
    event_loop: JoinHandle<()>,
}

impl<A, L> BluetoothManager<A, L>
where
    A: AdvertisementSource,
    L: GattLink<Device = A::Device>,
{
    /// Creates a new BluetoothManager. Must be called inside a tokio runtime.
    pub fn new(
        source: Option<A>,
        link: Arc<L>,
        target: TargetSpec,
        collaborators: Collaborators,
        min_rssi: Option<i16>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (matches_tx, matches_rx) = mpsc::unbounded_channel();

        let router = NotificationRouter::new(
            target.characteristic_id,
            collaborators.alerts.clone(),
            collaborators.calls.clone(),
            collaborators.status.clone(),
        );
        let session = Arc::new(Mutex::new(GattSession::new(
            link,
            target.clone(),
            collaborators.gate.clone(),
            collaborators.status.clone(),
            router,
            events_tx,
        )));
        let scanner = BluetoothScanner::new(
            source,
            collaborators.gate.clone(),
            collaborators.status.clone(),
            min_rssi,
            matches_tx,
        );
        let event_loop = tokio::spawn(Self::run_event_loop(session.clone(), events_rx, matches_rx));

        Self {
            target,
            scanner,
            session,
            status: collaborators.status,
            alerts: collaborators.alerts,
            event_loop,
        }
    }

    async fn run_event_loop(
        session: Arc<Mutex<GattSession<L>>>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut matches: mpsc::UnboundedReceiver<A::Device>,
    ) {
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    session.lock().await.handle_event(event);
                }
                Some(device) = matches.recv() => {
                    if let Err(e) = session.lock().await.connect(device) {
                        warn!("Could not connect to matched device: {}", e);
                    }
                }
                else => break,
            }
        }
        info!("Bluetooth event loop finished");
    }

    /// Scans for the target and connects to the first match. Refused while
    /// a session is live; close it first.
    pub async fn start_scan(&mut self) -> Result<(), BleError> {
        let state = self.session.lock().await.state();
        if state.is_live() {
            warn!("Scan refused, session in state {:?}", state);
            let err = BleError::SessionActive;
            self.status.set_status(&err.to_string());
            return Err(err);
        }
        self.scanner.start_scan(self.target.clone()).await
    }

    pub async fn stop_scan(&mut self) {
        self.scanner.stop_scan().await
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Closes the current session, if any
    pub async fn disconnect(&self) {
        self.session.lock().await.close();
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Raises the default alert without any peripheral involved
    pub fn test_alert(&self) {
        self.status.set_status("Welcome to Handy Home Service");
        self.alerts.display(ALERT_TITLE, DEFAULT_ALERT_MESSAGE, true);
    }

    /// Stops scanning, closes the session and ends the event loop
    pub async fn shutdown(&mut self) {
        info!("Shutting down bluetooth manager");
        self.scanner.stop_scan().await;
        self.session.lock().await.close();
        self.event_loop.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{UUID_ALERT_CHAR, UUID_CCCD};
    use crate::core::bluetooth::device::ScanCandidate;
    use crate::core::bluetooth::events::{GattEvent, GattStatus, LinkState};
    use crate::core::bluetooth::session::tests::{FakeLink, Recorder, Request, alert_service, granted_gate, target};
    use crate::core::bluetooth::types::SessionState;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use futures_util::stream::{self, BoxStream};
    use std::time::Duration;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[derive(Clone)]
    struct ScriptedSource(Vec<ScanCandidate<&'static str>>);

    #[async_trait]
    impl AdvertisementSource for ScriptedSource {
        type Device = &'static str;

        async fn advertisements(&self) -> Result<BoxStream<'_, ScanCandidate<&'static str>>, BleError> {
            Ok(stream::iter(self.0.clone()).boxed())
        }
    }

    fn rpi(device: &'static str) -> ScanCandidate<&'static str> {
        ScanCandidate::new(device, device.to_string(), Some("RPi".to_string()), vec![], Some(-50))
    }

    fn manager(
        candidates: Vec<ScanCandidate<&'static str>>,
    ) -> (BluetoothManager<ScriptedSource, FakeLink>, Arc<FakeLink>, Arc<Recorder>) {
        init_logger();
        let link = Arc::new(FakeLink::new());
        let recorder = Arc::new(Recorder::default());
        let collaborators = Collaborators {
            gate: granted_gate(),
            status: recorder.clone(),
            alerts: recorder.clone(),
            calls: recorder.clone(),
        };
        let manager = BluetoothManager::new(
            Some(ScriptedSource(candidates)),
            link.clone(),
            target(),
            collaborators,
            None,
        );
        (manager, link, recorder)
    }

    async fn wait_for_state(manager: &BluetoothManager<ScriptedSource, FakeLink>, state: SessionState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.snapshot().await.state != state {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("session never reached the expected state");
    }

    #[tokio::test]
    async fn test_scan_match_starts_connection() {
        let (mut manager, link, recorder) = manager(vec![rpi("rpi")]);

        manager.start_scan().await.unwrap();
        wait_for_state(&manager, SessionState::Connecting).await;

        assert_eq!(link.requests(), vec![Request::Connect("rpi", 1)]);
        assert!(recorder.statuses.lock().unwrap().contains(&"Device found: RPi".to_string()));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_to_end_alert_and_call() {
        let (mut manager, link, recorder) = manager(vec![rpi("rpi")]);
        manager.start_scan().await.unwrap();
        wait_for_state(&manager, SessionState::Connecting).await;

        let sink = link.sink();
        sink.post(GattEvent::ConnectionStateChanged { status: GattStatus::Success, state: LinkState::Connected });
        sink.post(GattEvent::ServicesDiscovered {
            status: GattStatus::Success,
            services: vec![alert_service(vec![UUID_CCCD])],
        });
        sink.post(GattEvent::DescriptorWritten { status: GattStatus::Success });
        wait_for_state(&manager, SessionState::Subscribed).await;

        sink.post(GattEvent::CharacteristicChanged {
            characteristic: UUID_ALERT_CHAR,
            value: b"CALL:2062014760".to_vec(),
        });
        tokio::time::timeout(Duration::from_secs(2), async {
            while recorder.calls.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("call never placed");

        assert_eq!(*recorder.alerts.lock().unwrap(), vec!["CALL:2062014760".to_string()]);
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["2062014760".to_string()]);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_match_does_not_replace_live_session() {
        let (mut manager, link, _recorder) = manager(vec![rpi("first")]);
        manager.start_scan().await.unwrap();
        wait_for_state(&manager, SessionState::Connecting).await;

        let result = manager.session.lock().await.connect("second");

        assert_eq!(result, Err(BleError::SessionActive));
        assert_eq!(manager.snapshot().await.generation, 1);
        assert_eq!(link.requests(), vec![Request::Connect("first", 1)]);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_scan_refused_while_session_is_live() {
        let (mut manager, link, recorder) = manager(vec![rpi("rpi")]);
        manager.start_scan().await.unwrap();
        wait_for_state(&manager, SessionState::Connecting).await;
        let published = recorder.statuses.lock().unwrap().len();

        assert_eq!(manager.start_scan().await, Err(BleError::SessionActive));
        assert!(!manager.is_scanning());
        assert_eq!(manager.snapshot().await.state, SessionState::Connecting);
        assert_eq!(link.requests(), vec![Request::Connect("rpi", 1)]);
        let statuses = recorder.statuses.lock().unwrap().clone();
        assert_eq!(statuses[published..].to_vec(), vec!["A session is already active".to_string()]);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_publishes_status() {
        let (mut manager, _link, recorder) = manager(vec![rpi("rpi")]);
        manager.start_scan().await.unwrap();
        wait_for_state(&manager, SessionState::Connecting).await;

        manager.disconnect().await;
        assert_eq!(manager.snapshot().await.state, SessionState::Closed);
        assert_eq!(recorder.statuses.lock().unwrap().last().map(String::as_str), Some("Disconnected"));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_then_rescan_starts_new_generation() {
        let (mut manager, link, _recorder) = manager(vec![rpi("rpi")]);
        manager.start_scan().await.unwrap();
        wait_for_state(&manager, SessionState::Connecting).await;

        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.snapshot().await.state, SessionState::Closed);
        assert_eq!(link.closes(), 1);

        manager.start_scan().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.snapshot().await.generation != 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("second connection never started");
        assert_eq!(manager.snapshot().await.state, SessionState::Connecting);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_test_alert_uses_default_message() {
        let (mut manager, _link, recorder) = manager(vec![]);
        manager.test_alert();

        assert_eq!(*recorder.alerts.lock().unwrap(), vec![DEFAULT_ALERT_MESSAGE.to_string()]);
        assert_eq!(
            recorder.statuses.lock().unwrap().last().map(String::as_str),
            Some("Welcome to Handy Home Service")
        );
        manager.shutdown().await;
    }
}
