//! Bluetooth Bridge Service
//!
//! Owns the unified device registry: two discovery catalogs (classic and
//! BLE) and the connection table, joined by device id and never aliased.
//! Routes every operation to the adapter named by the id's namespace and
//! funnels all link loss, however detected, into one event sink.

use crate::domain::models::{
    BridgeEvent, ConnectedDevice, ConnectionRecord, Device, DeviceKind, DiscoveryFilters,
    ExternalDevice, UNKNOWN_ADDRESS, UNKNOWN_DEVICE_NAME,
};
use crate::domain::settings::Settings;
use crate::error::{BridgeError, Result};
use crate::infrastructure::bluetooth::{
    ble::BleAdapter,
    classic::ClassicAdapter,
    connection::{DisconnectCallback, HealthConfig, SendLimits},
    platform::{BleRadio, ClassicPlatform},
};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Tunables for the bridge and its adapters
#[derive(Debug, Clone, Copy)]
pub struct BridgeConfig {
    pub scan_duration: Duration,
    pub classic_health: HealthConfig,
    pub ble_health: HealthConfig,
    pub limits: SendLimits,
}

impl BridgeConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            scan_duration: settings.ble_scan_duration(),
            classic_health: HealthConfig::classic(settings),
            ble_health: HealthConfig::ble(settings),
            limits: SendLimits::from_settings(settings),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Result of a successful connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub device_id: String,
    pub name: String,
    pub kind: DeviceKind,
}

/// Result of a successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub bytes_sent: usize,
    pub kind: DeviceKind,
}

/// Insertion-ordered device catalog keyed by id
#[derive(Debug, Default)]
struct Catalog {
    entries: Vec<Device>,
}

impl Catalog {
    fn get(&self, id: &str) -> Option<&Device> {
        self.entries.iter().find(|d| d.id == id)
    }

    fn upsert(&mut self, device: Device) {
        match self.entries.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => self.entries.push(device),
        }
    }

    fn retain(&mut self, keep: impl FnMut(&Device) -> bool) {
        self.entries.retain(keep);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Default)]
struct Registry {
    classic: Catalog,
    ble: Catalog,
    /// Ids injected through `add_discovered_device`; they survive rescans
    injected: HashSet<String>,
    connections: BTreeMap<String, ConnectionRecord>,
    /// Ids with a connect in flight
    pending: HashSet<String>,
}

impl Registry {
    /// `ble_<millis>`, suffixed with a counter if that id is already taken
    fn generated_id(&self, millis: i64) -> String {
        let base = DeviceKind::Ble.device_id(&millis.to_string());
        let mut id = base.clone();
        let mut n = 1;
        while self.ble.get(&id).is_some() {
            id = format!("{}_{}", base, n);
            n += 1;
        }
        id
    }

    fn catalog(&self, kind: DeviceKind) -> &Catalog {
        match kind {
            DeviceKind::Classic => &self.classic,
            DeviceKind::Ble => &self.ble,
        }
    }
}

/// Main service coordinating both transports
pub struct BridgeService {
    classic: ClassicAdapter,
    ble: BleAdapter,
    registry: Arc<Mutex<Registry>>,
    scan_duration: Duration,
}

impl BridgeService {
    /// Build the service and wire both adapters' disconnect callbacks into
    /// `events`. Must be called within a Tokio runtime.
    pub fn new(
        classic_platform: Arc<dyn ClassicPlatform>,
        radio: Arc<dyn BleRadio>,
        events: mpsc::UnboundedSender<BridgeEvent>,
        config: BridgeConfig,
    ) -> Self {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let on_disconnect = Self::disconnect_sink(registry.clone(), events);

        Self {
            classic: ClassicAdapter::new(
                classic_platform,
                on_disconnect.clone(),
                config.classic_health,
                config.limits,
            ),
            ble: BleAdapter::new(radio, on_disconnect, config.ble_health, config.limits),
            registry,
            scan_duration: config.scan_duration,
        }
    }

    fn disconnect_sink(
        registry: Arc<Mutex<Registry>>,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> DisconnectCallback {
        Arc::new(move |device_id: String| {
            let removed = registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .connections
                .remove(&device_id)
                .is_some();
            info!(
                "Device {} disconnected (connection record removed: {})",
                device_id, removed
            );
            if events
                .send(BridgeEvent::DeviceDisconnected { device_id })
                .is_err()
            {
                error!("Bridge event sink closed; disconnect not forwarded");
            }
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run classic discovery then a BLE scan and return the merged list.
    ///
    /// A failed BLE scan is logged and leaves the BLE catalog untouched;
    /// classic results are still returned.
    pub async fn discover_devices(&self, filters: &DiscoveryFilters) -> Result<Vec<Device>> {
        info!("Starting Bluetooth Classic discovery...");
        let classic = self.classic.discover().await;
        {
            let mut registry = self.registry();
            for info in &classic {
                registry.classic.upsert(Device::from_classic(info));
            }
        }

        info!("Starting BLE scan for nearby devices...");
        match self.ble.scan(self.scan_duration).await {
            Ok(found) => {
                let mut registry = self.registry();
                let Registry { ble, injected, .. } = &mut *registry;
                ble.retain(|d| injected.contains(&d.id));
                for info in &found {
                    ble.upsert(Device::from_ble(info));
                }
                info!("Found {} BLE devices", found.len());
            }
            Err(e) => warn!("BLE scan error: {}", e),
        }

        let registry = self.registry();
        let devices: Vec<Device> = registry
            .ble
            .entries
            .iter()
            .chain(registry.classic.entries.iter())
            .filter(|d| !(filters.ignore_unknown && d.has_placeholder_name()))
            .map(|d| Device {
                connected: d.connected || registry.connections.contains_key(&d.id),
                ..d.clone()
            })
            .collect();

        info!("Returning {} total devices", devices.len());
        Ok(devices)
    }

    /// Connect a catalogued device and record a connection snapshot.
    pub async fn connect_device(&self, device_id: &str) -> Result<Connected> {
        let device = {
            let mut registry = self.registry();
            if registry.connections.contains_key(device_id)
                || registry.pending.contains(device_id)
            {
                return Err(BridgeError::AlreadyConnected(device_id.to_string()));
            }
            let device = DeviceKind::from_device_id(device_id)
                .and_then(|kind| registry.catalog(kind).get(device_id))
                .cloned()
                .ok_or_else(|| BridgeError::DeviceNotFound(device_id.to_string()))?;
            registry.pending.insert(device_id.to_string());
            device
        };

        let result = match device.kind {
            DeviceKind::Classic => self.classic.connect(&device.address).await,
            DeviceKind::Ble => self.ble.connect(device_id).await,
        };

        let mut registry = self.registry();
        registry.pending.remove(device_id);
        result?;

        // The link may already have dropped again; the adapter then fired
        // its callback before we had a record to remove.
        if !self.adapter_has_link(&device) {
            return Err(BridgeError::adapter(format!(
                "Connection to {} was lost while connecting",
                device_id
            )));
        }

        let connected = Connected {
            device_id: device_id.to_string(),
            name: device.name.clone(),
            kind: device.kind,
        };
        registry
            .connections
            .insert(device_id.to_string(), ConnectionRecord::new(device));
        info!("Connected {} ({:?})", device_id, connected.kind);
        Ok(connected)
    }

    pub async fn disconnect_device(&self, device_id: &str) -> Result<()> {
        let record = self.connection(device_id)?;
        match record.kind() {
            DeviceKind::Classic => self.classic.disconnect(&record.device.address).await?,
            DeviceKind::Ble => self.ble.disconnect(device_id).await?,
        }
        self.registry().connections.remove(device_id);
        info!("Disconnected {}", device_id);
        Ok(())
    }

    pub async fn send_data(&self, device_id: &str, payload: &[u8]) -> Result<SendReport> {
        let record = self.connection(device_id)?;
        let bytes_sent = match record.kind() {
            DeviceKind::Classic => {
                self.classic
                    .send_data(&record.device.address, payload)
                    .await?
            }
            DeviceKind::Ble => self.ble.send_data(device_id, payload).await?,
        };
        Ok(SendReport {
            bytes_sent,
            kind: record.kind(),
        })
    }

    pub fn get_connected_devices(&self) -> Vec<ConnectedDevice> {
        self.registry()
            .connections
            .values()
            .map(ConnectedDevice::from)
            .collect()
    }

    /// Inject a device resolved outside the bridge into the BLE catalog.
    pub fn add_discovered_device(&self, device: ExternalDevice) -> String {
        let mut registry = self.registry();
        let id = match device.id.filter(|id| !id.is_empty()) {
            Some(id) if id.starts_with(DeviceKind::Ble.prefix()) => id,
            Some(id) => DeviceKind::Ble.device_id(&id),
            None => registry.generated_id(chrono::Utc::now().timestamp_millis()),
        };

        let entry = Device {
            id: id.clone(),
            name: device
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            address: device
                .address
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string()),
            kind: DeviceKind::Ble,
            paired: None,
            rssi: None,
            connected: false,
        };

        registry.ble.upsert(entry);
        registry.injected.insert(id.clone());
        info!("Added external device {}", id);
        id
    }

    /// Empty both catalogs; live connections are untouched.
    pub fn clear_discovered_devices(&self) {
        let mut registry = self.registry();
        registry.classic.clear();
        registry.ble.clear();
        registry.injected.clear();
        info!("Cleared discovered devices");
    }

    /// Disconnect everything. Used on shutdown.
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.registry().connections.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.disconnect_device(&id).await {
                warn!("Failed to disconnect {} on shutdown: {}", id, e);
            }
        }
    }

    fn connection(&self, device_id: &str) -> Result<ConnectionRecord> {
        self.registry()
            .connections
            .get(device_id)
            .cloned()
            .ok_or_else(|| BridgeError::NotConnected(device_id.to_string()))
    }

    fn adapter_has_link(&self, device: &Device) -> bool {
        match device.kind {
            DeviceKind::Classic => self.classic.is_connected(&device.address),
            DeviceKind::Ble => self.ble.is_connected(&device.id),
        }
    }
}
