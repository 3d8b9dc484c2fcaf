use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use bluest::{Adapter, Device};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::SCAN_FAILED_INTERNAL_ERROR;
use crate::core::bluetooth::device::ScanCandidate;
use crate::core::bluetooth::types::TargetSpec;
use crate::core::ports::{PermissionGate, StatusSink};
use crate::error::BleError;

static MAC_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("valid MAC pattern"));

/// A live feed of advertisements.
///
/// The stream runs until it is dropped; dropping it stops the platform scan.
#[async_trait]
pub trait AdvertisementSource: Clone + Send + Sync + 'static {
    type Device: Clone + fmt::Debug + Send + Sync + 'static;

    async fn advertisements(&self) -> Result<BoxStream<'_, ScanCandidate<Self::Device>>, BleError>;
}

pub struct BluetoothScanner<A: AdvertisementSource> {
    /// `None` when the host has no Bluetooth adapter
    source: Option<A>,
    gate: Arc<dyn PermissionGate>,
    status: Arc<dyn StatusSink>,
    min_rssi: Option<i16>,
    matches: mpsc::UnboundedSender<A::Device>,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl<A: AdvertisementSource> BluetoothScanner<A> {
    pub fn new(
        source: Option<A>,
        gate: Arc<dyn PermissionGate>,
        status: Arc<dyn StatusSink>,
        min_rssi: Option<i16>,
        matches: mpsc::UnboundedSender<A::Device>,
    ) -> Self {
        Self {
            source,
            gate,
            status,
            min_rssi,
            matches,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    /// Starts scanning for `target`. The first matching device is sent on
    /// the match channel and the scan stops.
    pub async fn start_scan(&mut self, target: TargetSpec) -> Result<(), BleError> {
        if !self.gate.has_required_capabilities() {
            self.gate.request_capabilities_if_needed();
            self.status.set_status(&BleError::PermissionDenied.to_string());
            return Err(BleError::PermissionDenied);
        }
        let Some(source) = self.source.clone() else {
            self.status.set_status(&BleError::ScannerUnavailable.to_string());
            return Err(BleError::ScannerUnavailable);
        };

        if self.scan_task_handle.is_some() {
            self.stop_scan().await;
        }

        self.status.set_status("Scanning...");
        self.cancel_token = CancellationToken::new();
        let cancel_token_for_task = self.cancel_token.clone();
        let status_for_task = self.status.clone();
        let matches_for_task = self.matches.clone();
        let min_rssi = self.min_rssi;

        let handle = tokio::spawn(async move {
            Self::internal_scan_task(
                source,
                target,
                cancel_token_for_task,
                min_rssi,
                status_for_task,
                matches_for_task,
            )
            .await;
        });
        self.scan_task_handle = Some(handle);
        info!("Device scan task started.");
        Ok(())
    }

    async fn internal_scan_task(
        source: A,
        target: TargetSpec,
        cancel_token: CancellationToken,
        min_rssi: Option<i16>,
        status: Arc<dyn StatusSink>,
        matches: mpsc::UnboundedSender<A::Device>,
    ) {
        info!("Starting bluetooth scan for {:?} / {}", target.name, target.service_id);
        let mut scan_stream = match source.advertisements().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Bluetooth scan could not start: {}", e);
                status.set_status(&e.to_string());
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(candidate) => {
                            debug!(
                                "Found device - Name: {:?}, Address: {}, Services: {:?}, RSSI: {:?}",
                                candidate.name, candidate.address, candidate.services, candidate.rssi
                            );
                            if candidate.is_below(min_rssi) {
                                continue;
                            }
                            if candidate.matches(&target) {
                                info!("Found target device: {} ({})", candidate.display_name(), candidate.address);
                                status.set_status(&format!("Device found: {}", candidate.display_name()));
                                if matches.send(candidate.device).is_err() {
                                    warn!("Match receiver dropped, discarding device");
                                }
                                break;
                            }
                        }
                        None => {
                            if !cancel_token.is_cancelled() {
                                error!("Bluetooth scan stream ended before the target was found");
                                status.set_status(&BleError::ScanFailed(SCAN_FAILED_INTERNAL_ERROR).to_string());
                            }
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        info!("Bluetooth scan stopped.");
    }

    /// Stops a running scan. Does nothing if no scan is running.
    pub async fn stop_scan(&mut self) {
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            info!("Waiting for scan task to finish...");
            if let Err(e) = handle.await {
                if e.is_cancelled() {
                    info!("Scan task was cancelled successfully.");
                } else {
                    error!("Scan task finished with an unexpected join error: {:?}", e);
                }
            }
        } else {
            debug!("No active scan task handle found to wait for.");
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Advertisement source backed by a bluest adapter
#[derive(Clone)]
pub struct BluestAdvertisements {
    adapter: Adapter,
}

impl BluestAdvertisements {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    fn candidate(device: Device, name: Option<String>, services: Vec<bluest::Uuid>, rssi: Option<i16>) -> ScanCandidate<Device> {
        let id = device.id().to_string();
        let address = extract_mac_address(&id).unwrap_or(id);
        let name = name.or_else(|| device.name().ok());
        ScanCandidate::new(device, address, name, services, rssi)
    }
}

#[async_trait]
impl AdvertisementSource for BluestAdvertisements {
    type Device = Device;

    async fn advertisements(&self) -> Result<BoxStream<'_, ScanCandidate<Device>>, BleError> {
        // A peripheral already connected at OS level does not advertise.
        let connected = match self.adapter.connected_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to list connected devices: {}", e);
                Vec::new()
            }
        };
        info!("{} device(s) already connected", connected.len());
        let known: Vec<_> = connected
            .into_iter()
            .map(|device| Self::candidate(device, None, Vec::new(), None))
            .collect();

        let scan_stream = self.adapter.scan(&[]).await.map_err(|e| {
            error!("Failed to start bluetooth scan: {}", e);
            BleError::ScanFailed(SCAN_FAILED_INTERNAL_ERROR)
        })?;
        let advertised = scan_stream.map(|discovered| {
            Self::candidate(
                discovered.device,
                discovered.adv_data.local_name,
                discovered.adv_data.services.into_iter().collect(),
                discovered.rssi,
            )
        });

        Ok(stream::iter(known).chain(advertised).boxed())
    }
}

fn extract_mac_address(device_id_str: &str) -> Option<String> {
    MAC_ADDRESS
        .find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{UUID_ALERT_CHAR, UUID_ALERT_SERVICE};
    use crate::core::bluetooth::session::tests::{Recorder, granted_gate, target};
    use crate::core::ports::MockPermissionGate;
    use uuid::Uuid;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[derive(Clone)]
    struct FakeSource {
        candidates: Vec<ScanCandidate<&'static str>>,
        endless: bool,
        fail: Option<BleError>,
    }

    #[async_trait]
    impl AdvertisementSource for FakeSource {
        type Device = &'static str;

        async fn advertisements(&self) -> Result<BoxStream<'_, ScanCandidate<&'static str>>, BleError> {
            if let Some(e) = self.fail.clone() {
                return Err(e);
            }
            let seen = stream::iter(self.candidates.clone());
            if self.endless {
                Ok(seen.chain(stream::pending()).boxed())
            } else {
                Ok(seen.boxed())
            }
        }
    }

    fn ad(device: &'static str, name: Option<&str>, services: Vec<Uuid>, rssi: i16) -> ScanCandidate<&'static str> {
        ScanCandidate::new(device, device.to_uppercase(), name.map(str::to_string), services, Some(rssi))
    }

    fn source(candidates: Vec<ScanCandidate<&'static str>>) -> FakeSource {
        FakeSource { candidates, endless: false, fail: None }
    }

    fn scanner(
        source: Option<FakeSource>,
        gate: Arc<dyn PermissionGate>,
        min_rssi: Option<i16>,
    ) -> (BluetoothScanner<FakeSource>, Arc<Recorder>, mpsc::UnboundedReceiver<&'static str>) {
        init_logger();
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (BluetoothScanner::new(source, gate, recorder.clone(), min_rssi, tx), recorder, rx)
    }

    #[tokio::test]
    async fn test_first_match_is_handed_over() {
        let (mut scanner, recorder, mut rx) = scanner(
            Some(source(vec![
                ad("phone", Some("Pixel"), vec![], -40),
                ad("rpi", Some("RPi"), vec![], -60),
                ad("rpi-2", None, vec![UUID_ALERT_SERVICE], -50),
            ])),
            granted_gate(),
            None,
        );

        scanner.start_scan(target()).await.unwrap();
        assert_eq!(rx.recv().await, Some("rpi"));
        scanner.stop_scan().await;

        assert!(rx.try_recv().is_err());
        assert!(!scanner.is_scanning());
        let statuses = recorder.statuses.lock().unwrap().clone();
        assert_eq!(statuses, vec!["Scanning...".to_string(), "Device found: RPi".to_string()]);
    }

    #[tokio::test]
    async fn test_service_match_without_name() {
        let (mut scanner, recorder, mut rx) =
            scanner(Some(source(vec![ad("pi", None, vec![UUID_ALERT_SERVICE], -70)])), granted_gate(), None);

        scanner.start_scan(target()).await.unwrap();
        assert_eq!(rx.recv().await, Some("pi"));
        scanner.stop_scan().await;
        assert!(recorder.statuses.lock().unwrap().contains(&"Device found: PI".to_string()));
    }

    #[tokio::test]
    async fn test_no_match_keeps_scanning_until_stream_ends() {
        let (mut scanner, _recorder, mut rx) = scanner(
            Some(source(vec![ad("other", Some("Other"), vec![], -40), ad("hrm", None, vec![UUID_ALERT_CHAR], -40)])),
            granted_gate(),
            None,
        );

        scanner.start_scan(target()).await.unwrap();
        scanner.stop_scan().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stream_ending_without_match_is_reported() {
        let (mut scanner, recorder, mut rx) =
            scanner(Some(source(vec![ad("other", Some("Other"), vec![], -40)])), granted_gate(), None);

        scanner.start_scan(target()).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while scanner.is_scanning() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("scan task never finished");

        assert!(rx.try_recv().is_err());
        assert_eq!(
            *recorder.statuses.lock().unwrap(),
            vec!["Scanning...".to_string(), "Scan failed: 3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stopped_scan_reports_nothing_more() {
        let mut endless = source(vec![]);
        endless.endless = true;
        let (mut scanner, recorder, _rx) = scanner(Some(endless), granted_gate(), None);

        scanner.start_scan(target()).await.unwrap();
        scanner.stop_scan().await;
        assert_eq!(*recorder.statuses.lock().unwrap(), vec!["Scanning...".to_string()]);
    }

    #[tokio::test]
    async fn test_weak_signal_is_skipped() {
        let (mut scanner, _recorder, mut rx) = scanner(
            Some(source(vec![ad("far", Some("RPi"), vec![], -95), ad("near", Some("RPi"), vec![], -60)])),
            granted_gate(),
            Some(-80),
        );

        scanner.start_scan(target()).await.unwrap();
        assert_eq!(rx.recv().await, Some("near"));
        scanner.stop_scan().await;
    }

    #[tokio::test]
    async fn test_stop_cancels_endless_scan() {
        let mut endless = source(vec![ad("other", Some("Other"), vec![], -40)]);
        endless.endless = true;
        let (mut scanner, _recorder, mut rx) = scanner(Some(endless), granted_gate(), None);

        scanner.start_scan(target()).await.unwrap();
        scanner.stop_scan().await;
        scanner.stop_scan().await;

        assert!(!scanner.is_scanning());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scan_failure_is_reported_as_status() {
        let mut failing = source(vec![]);
        failing.fail = Some(BleError::ScanFailed(SCAN_FAILED_INTERNAL_ERROR));
        let (mut scanner, recorder, _rx) = scanner(Some(failing), granted_gate(), None);

        scanner.start_scan(target()).await.unwrap();
        scanner.stop_scan().await;
        assert_eq!(recorder.statuses.lock().unwrap().last().map(String::as_str), Some("Scan failed: 3"));
    }

    #[tokio::test]
    async fn test_missing_permission_rejects_scan() {
        let mut gate = MockPermissionGate::new();
        gate.expect_has_required_capabilities().return_const(false);
        gate.expect_request_capabilities_if_needed().times(1).return_const(());
        let (mut scanner, recorder, _rx) = scanner(Some(source(vec![])), Arc::new(gate), None);

        assert_eq!(scanner.start_scan(target()).await, Err(BleError::PermissionDenied));
        assert!(!scanner.is_scanning());
        assert_eq!(
            *recorder.statuses.lock().unwrap(),
            vec!["Bluetooth permissions not granted".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_adapter_rejects_scan() {
        let (mut scanner, recorder, _rx) = scanner(None, granted_gate(), None);

        assert_eq!(scanner.start_scan(target()).await, Err(BleError::ScannerUnavailable));
        assert_eq!(*recorder.statuses.lock().unwrap(), vec!["Scanner unavailable".to_string()]);
    }

    #[test]
    fn test_extract_mac_address() {
        assert_eq!(
            extract_mac_address("/org/bluez/hci0/dev_dc:a6:32:01:02:03 DC:A6:32:01:02:03"),
            Some("DC:A6:32:01:02:03".to_string())
        );
        assert_eq!(extract_mac_address("3F2504E0-4F89-11D3-9A0C-0305E82C3301"), None);
    }
}
