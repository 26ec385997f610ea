//! BLE Transport Adapter
//!
//! Scanning, GATT connection bookkeeping, characteristic writes and
//! RSSI-based liveness for BLE peripherals. Peripherals are tracked by
//! their adapter-local id; the `ble_` namespace is stripped on entry and
//! added back on every upward notification.

use crate::domain::models::{BleDeviceInfo, DeviceKind, UNKNOWN_DEVICE_NAME};
use crate::error::{BridgeError, Result};
use crate::infrastructure::bluetooth::connection::{
    self, DisconnectCallback, HealthConfig, HealthMonitor, SendLimits,
};
use crate::infrastructure::bluetooth::platform::{BleRadio, CharacteristicInfo, RadioState};
use crate::infrastructure::bluetooth::protocol;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

struct BleLink {
    device: BleDeviceInfo,
    connected_at: i64,
    characteristics: Option<Vec<CharacteristicInfo>>,
    monitor: Option<HealthMonitor>,
    /// Set while a voluntary disconnect is in flight
    closing: bool,
}

#[derive(Default)]
struct BleState {
    /// Result of the latest scan, insertion-ordered by first advertisement
    discovered: Vec<BleDeviceInfo>,
    /// Every peripheral any scan has heard; never cleared by a rescan
    known: HashMap<String, BleDeviceInfo>,
    links: HashMap<String, BleLink>,
    scanning: bool,
}

impl BleState {
    fn record_advertisement(&mut self, advert: BleDeviceInfo) {
        match self.known.get_mut(&advert.id) {
            Some(known) => merge_advertisement(known, &advert),
            None => {
                self.known.insert(advert.id.clone(), advert.clone());
            }
        }
        match self.discovered.iter_mut().find(|d| d.id == advert.id) {
            Some(existing) => merge_advertisement(existing, &advert),
            None => {
                debug!("Discovered: {} ({})", advert.name, advert.address);
                self.discovered.push(advert);
            }
        }
    }

    fn live_link(&self, id: &str) -> Option<&BleLink> {
        self.links.get(id).filter(|link| !link.closing)
    }
}

/// A repeat advertisement may carry a name or RSSI the first one lacked.
fn merge_advertisement(existing: &mut BleDeviceInfo, advert: &BleDeviceInfo) {
    if advert.name != UNKNOWN_DEVICE_NAME {
        existing.name = advert.name.clone();
    }
    if advert.rssi.is_some() {
        existing.rssi = advert.rssi;
    }
}

/// Live BLE connection as seen by the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleConnection {
    pub id: String,
    pub name: String,
    pub address: String,
    pub connected_at: i64,
}

/// BLE adapter; cheap to clone, clones share state
#[derive(Clone)]
pub struct BleAdapter {
    radio: Arc<dyn BleRadio>,
    state: Arc<Mutex<BleState>>,
    /// Held for a whole scan window; one scan owns the radio at a time
    scan_lock: Arc<tokio::sync::Mutex<()>>,
    on_disconnect: DisconnectCallback,
    health: HealthConfig,
    limits: SendLimits,
}

impl BleAdapter {
    /// Create the adapter and start listening for unsolicited link loss.
    /// Must be called within a Tokio runtime.
    pub fn new(
        radio: Arc<dyn BleRadio>,
        on_disconnect: DisconnectCallback,
        health: HealthConfig,
        limits: SendLimits,
    ) -> Self {
        let adapter = Self {
            radio,
            state: Arc::new(Mutex::new(BleState::default())),
            scan_lock: Arc::new(tokio::sync::Mutex::new(())),
            on_disconnect,
            health,
            limits,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        adapter.radio.subscribe_disconnects(tx);
        tokio::spawn(adapter.clone().watch_link_loss(rx));

        adapter
    }

    fn state(&self) -> MutexGuard<'_, BleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn watch_link_loss(self, mut events: mpsc::UnboundedReceiver<String>) {
        while let Some(id) = events.recv().await {
            self.teardown(&id, "radio reported disconnect");
        }
        debug!("BLE disconnect event stream closed");
    }

    /// Scan for `duration` and return everything heard.
    ///
    /// Overlapping callers queue behind the scan in progress and then run
    /// their own window.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<BleDeviceInfo>> {
        let _scan = self.scan_lock.lock().await;
        self.state().discovered.clear();

        let radio_state = self.radio.state().await?;
        if radio_state != RadioState::PoweredOn {
            return Err(BridgeError::RadioUnavailable(format!(
                "Bluetooth is {}",
                radio_state
            )));
        }

        info!("Starting BLE scan for {}ms", duration.as_millis());
        let mut adverts = self.radio.start_scan().await?;
        self.state().scanning = true;

        let window = tokio::time::sleep(duration);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                advert = adverts.recv() => match advert {
                    Some(advert) => {
                        self.state().record_advertisement(advert);
                    }
                    None => {
                        // Radio stopped reporting early; still honour the window
                        (&mut window).await;
                        break;
                    }
                },
            }
        }

        self.stop_scan().await;
        let found = self.discovered_devices();
        info!("Scan complete. Found {} devices", found.len());
        Ok(found)
    }

    pub async fn stop_scan(&self) {
        let was_scanning = std::mem::take(&mut self.state().scanning);
        if was_scanning {
            if let Err(e) = self.radio.stop_scan().await {
                warn!("Failed to stop BLE scan: {}", e);
            }
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    /// Connect a peripheral heard by any earlier scan. Idempotent.
    pub async fn connect(&self, device_id: &str) -> Result<()> {
        let id = DeviceKind::Ble.local_id(device_id);
        let device = {
            let state = self.state();
            if state.links.contains_key(id) {
                debug!("{} already connected", device_id);
                return Ok(());
            }
            state
                .known
                .get(id)
                .cloned()
                .ok_or_else(|| {
                    warn!("Peripheral not found for ID: {}", id);
                    BridgeError::DeviceNotFound(device_id.to_string())
                })?
        };

        info!("Connecting to BLE device: {} ({})", device.name, id);
        self.radio
            .connect(id)
            .await
            .map_err(|e| BridgeError::adapter(format!("Failed to connect: {}", e)))?;

        let characteristics = match self.radio.characteristics(id).await {
            Ok(found) => {
                debug!("{} exposes {} characteristics", id, found.len());
                Some(found)
            }
            Err(e) => {
                warn!("Characteristic discovery on {} failed, will retry on send: {}", id, e);
                None
            }
        };

        let mut state = self.state();
        let monitor = self.start_monitor(id.to_string());
        state.links.insert(
            id.to_string(),
            BleLink {
                device,
                connected_at: chrono::Utc::now().timestamp_millis(),
                characteristics,
                monitor: Some(monitor),
                closing: false,
            },
        );
        info!("Successfully connected to {}", id);
        Ok(())
    }

    /// Stop the probe, then disconnect the peripheral.
    pub async fn disconnect(&self, device_id: &str) -> Result<()> {
        let id = DeviceKind::Ble.local_id(device_id);
        {
            let mut state = self.state();
            let link = state
                .links
                .get_mut(id)
                .filter(|link| !link.closing)
                .ok_or_else(|| BridgeError::NotConnected(device_id.to_string()))?;
            link.closing = true;
            if let Some(monitor) = link.monitor.take() {
                monitor.stop();
            }
        }

        info!("Disconnecting from BLE device: {}", id);
        if let Err(e) = self.radio.disconnect(id).await {
            warn!("BLE disconnection error on {}: {}", id, e);
            let mut state = self.state();
            if let Some(link) = state.links.get_mut(id) {
                link.closing = false;
                link.monitor = Some(self.start_monitor(id.to_string()));
            }
            return Err(BridgeError::adapter(format!("Failed to disconnect: {}", e)));
        }

        self.state().links.remove(id);
        info!("Successfully disconnected from {}", id);
        Ok(())
    }

    /// Write the payload to the first writable characteristic.
    pub async fn send_data(&self, device_id: &str, payload: &[u8]) -> Result<usize> {
        let id = DeviceKind::Ble.local_id(device_id);
        let cached = self
            .state()
            .live_link(id)
            .ok_or_else(|| BridgeError::NotConnected(device_id.to_string()))?
            .characteristics
            .clone();

        let characteristics = match cached {
            Some(found) => found,
            None => {
                let found = self.radio.characteristics(id).await?;
                if let Some(link) = self.state().links.get_mut(id) {
                    link.characteristics = Some(found.clone());
                }
                found
            }
        };

        let target = characteristics
            .into_iter()
            .find(CharacteristicInfo::is_writable)
            .ok_or_else(|| BridgeError::NoWritableCharacteristic(device_id.to_string()))?;
        let mode = target.preferred_write_mode();
        debug!("Writing to {} via {} ({:?})", id, target.uuid, mode);

        let chunks = protocol::encode(payload);
        let radio = self.radio.clone();
        let local = id.to_string();
        let target = Arc::new(target);
        connection::transmit(
            device_id,
            chunks,
            &self.limits,
            || self.is_connected(device_id),
            |bytes| {
                let radio = radio.clone();
                let local = local.clone();
                let target = target.clone();
                async move {
                    radio
                        .write(&local, &target, &bytes, mode)
                        .await
                        .map_err(|e| BridgeError::adapter(format!("Failed to write data: {}", e)))
                }
            },
        )
        .await
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        let id = DeviceKind::Ble.local_id(device_id);
        self.state().live_link(id).is_some()
    }

    pub fn discovered_devices(&self) -> Vec<BleDeviceInfo> {
        self.state().discovered.clone()
    }

    pub fn connected_devices(&self) -> Vec<BleConnection> {
        self.state()
            .links
            .iter()
            .filter(|(_, link)| !link.closing)
            .map(|(id, link)| BleConnection {
                id: id.clone(),
                name: link.device.name.clone(),
                address: link.device.address.clone(),
                connected_at: link.connected_at,
            })
            .collect()
    }

    fn start_monitor(&self, id: String) -> HealthMonitor {
        let adapter = self.clone();
        let HealthConfig {
            interval,
            failure_threshold,
        } = self.health;
        HealthMonitor::spawn(async move {
            let mut failures = 0;
            loop {
                tokio::time::sleep(interval).await;
                match adapter.radio.read_rssi(&id).await {
                    Ok(rssi) => {
                        failures = 0;
                        trace!("{} alive (rssi {:?})", id, rssi);
                        adapter.refresh_rssi(&id, rssi);
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(
                            "Health check {}/{} failed for {}: {}",
                            failures, failure_threshold, id, e
                        );
                        if failures >= failure_threshold {
                            adapter.teardown(&id, "health check failed");
                            return;
                        }
                    }
                }
            }
        })
    }

    fn refresh_rssi(&self, id: &str, rssi: Option<i16>) {
        if let (Some(link), Some(_)) = (self.state().links.get_mut(id), rssi) {
            link.device.rssi = rssi;
        }
    }

    /// Single cleanup path for monitor-detected and radio-reported loss.
    fn teardown(&self, id: &str, reason: &str) {
        let link = {
            let mut state = self.state();
            if state.live_link(id).is_none() {
                return;
            }
            state.links.remove(id)
        };

        if let Some(monitor) = link.and_then(|link| link.monitor) {
            monitor.stop();
        }
        warn!("BLE device {} lost: {}", id, reason);
        (self.on_disconnect)(DeviceKind::Ble.device_id(id));
    }
}
