//! Classic Transport Adapter
//!
//! Discovery, connection bookkeeping, chunked sends and liveness polling
//! for classic devices. All OS interaction goes through a
//! [`ClassicPlatform`].

use crate::domain::models::{ClassicDeviceInfo, DeviceKind, UNKNOWN_DEVICE_NAME};
use crate::error::{BridgeError, Result};
use crate::infrastructure::bluetooth::connection::{
    self, DisconnectCallback, HealthConfig, HealthMonitor, SendLimits,
};
use crate::infrastructure::bluetooth::platform::ClassicPlatform;
use crate::infrastructure::bluetooth::protocol;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

/// Live classic connection as seen by the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassicConnection {
    pub address: String,
    pub name: String,
    pub connected_at: i64,
}

struct ClassicLink {
    name: String,
    connected_at: i64,
    monitor: Option<HealthMonitor>,
}

#[derive(Default)]
struct ClassicState {
    /// Insertion-ordered, keyed by address
    devices: Vec<ClassicDeviceInfo>,
    links: HashMap<String, ClassicLink>,
}

impl ClassicState {
    fn device_mut(&mut self, address: &str) -> Option<&mut ClassicDeviceInfo> {
        self.devices.iter_mut().find(|d| d.address == address)
    }

    fn upsert(&mut self, device: ClassicDeviceInfo) {
        match self.device_mut(&device.address) {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
    }
}

/// Classic adapter; cheap to clone, clones share state
#[derive(Clone)]
pub struct ClassicAdapter {
    platform: Arc<dyn ClassicPlatform>,
    state: Arc<Mutex<ClassicState>>,
    on_disconnect: DisconnectCallback,
    health: HealthConfig,
    limits: SendLimits,
}

impl ClassicAdapter {
    pub fn new(
        platform: Arc<dyn ClassicPlatform>,
        on_disconnect: DisconnectCallback,
        health: HealthConfig,
        limits: SendLimits,
    ) -> Self {
        Self {
            platform,
            state: Arc::new(Mutex::new(ClassicState::default())),
            on_disconnect,
            health,
            limits,
        }
    }

    fn state(&self) -> MutexGuard<'_, ClassicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enumerate classic devices.
    ///
    /// Platform failures degrade to an empty list so one broken
    /// enumeration never fails the whole discovery cycle.
    pub async fn discover(&self) -> Vec<ClassicDeviceInfo> {
        let found = match self.platform.discover().await {
            Ok(found) => found,
            Err(e) => {
                warn!("Classic discovery failed: {}", e);
                return Vec::new();
            }
        };

        let mut state = self.state();
        for device in &found {
            let mut device = device.clone();
            if state.links.contains_key(&device.address) {
                device.connected = true;
            }
            state.upsert(device);
        }
        info!("Classic discovery found {} devices", found.len());
        found
    }

    /// Connect (best-effort) and start the liveness probe.
    pub async fn connect(&self, address: &str) -> Result<()> {
        info!("Connecting to classic device {}", address);
        self.platform
            .connect(address)
            .await
            .map_err(|e| BridgeError::adapter(format!("Connection failed: {}", e)))?;

        let mut state = self.state();
        if state.links.contains_key(address) {
            debug!("Classic device {} already linked", address);
            return Ok(());
        }

        let name = match state.device_mut(address) {
            Some(device) => {
                device.connected = true;
                device.name.clone()
            }
            None => UNKNOWN_DEVICE_NAME.to_string(),
        };
        let monitor = self.start_monitor(address.to_string());
        state.links.insert(
            address.to_string(),
            ClassicLink {
                name,
                connected_at: chrono::Utc::now().timestamp_millis(),
                monitor: Some(monitor),
            },
        );
        Ok(())
    }

    /// Stop the probe, then disconnect and drop the connection record.
    pub async fn disconnect(&self, address: &str) -> Result<()> {
        {
            let mut state = self.state();
            let link = state
                .links
                .get_mut(address)
                .ok_or_else(|| BridgeError::NotConnected(self.device_id(address)))?;
            // Stopped before the platform call so the probe cannot report
            // this intentional disconnect as a failure.
            if let Some(monitor) = link.monitor.take() {
                monitor.stop();
            }
        }

        info!("Disconnecting classic device {}", address);
        if let Err(e) = self.platform.disconnect(address).await {
            warn!("Classic disconnect of {} failed: {}", address, e);
            let mut state = self.state();
            if let Some(link) = state.links.get_mut(address) {
                link.monitor = Some(self.start_monitor(address.to_string()));
            }
            return Err(BridgeError::adapter(format!("Disconnection failed: {}", e)));
        }

        let mut state = self.state();
        state.links.remove(address);
        if let Some(device) = state.device_mut(address) {
            device.connected = false;
        }
        Ok(())
    }

    /// Run the payload through the codec and write it chunk by chunk.
    pub async fn send_data(&self, address: &str, payload: &[u8]) -> Result<usize> {
        let device_id = self.device_id(address);
        if !self.is_connected(address) {
            return Err(BridgeError::NotConnected(device_id));
        }

        let chunks = protocol::encode(payload);
        let platform = self.platform.clone();
        let target = address.to_string();
        connection::transmit(
            &device_id,
            chunks,
            &self.limits,
            || self.is_connected(address),
            |bytes| {
                let platform = platform.clone();
                let target = target.clone();
                async move { platform.write(&target, &bytes).await }
            },
        )
        .await
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.state().links.contains_key(address)
    }

    pub fn get_device(&self, address: &str) -> Option<ClassicDeviceInfo> {
        self.state()
            .devices
            .iter()
            .find(|d| d.address == address)
            .cloned()
    }

    pub fn all_devices(&self) -> Vec<ClassicDeviceInfo> {
        self.state().devices.clone()
    }

    pub fn connected_devices(&self) -> Vec<ClassicConnection> {
        self.state()
            .links
            .iter()
            .map(|(address, link)| ClassicConnection {
                address: address.clone(),
                name: link.name.clone(),
                connected_at: link.connected_at,
            })
            .collect()
    }

    fn device_id(&self, address: &str) -> String {
        DeviceKind::Classic.device_id(address)
    }

    fn start_monitor(&self, address: String) -> HealthMonitor {
        let adapter = self.clone();
        let HealthConfig {
            interval,
            failure_threshold,
        } = self.health;
        HealthMonitor::spawn(async move {
            let mut misses = 0;
            loop {
                tokio::time::sleep(interval).await;
                match adapter.platform.is_connected(&address).await {
                    Ok(true) => {
                        misses = 0;
                        trace!("Classic device {} alive", address);
                    }
                    Ok(false) => {
                        misses += 1;
                        if misses >= failure_threshold {
                            adapter.teardown(&address, "platform reports it disconnected");
                            return;
                        }
                        debug!(
                            "Classic device {} reported down ({}/{})",
                            address, misses, failure_threshold
                        );
                    }
                    // An unanswered query is not evidence of link loss
                    Err(e) => warn!("Liveness query for {} failed: {}", address, e),
                }
            }
        })
    }

    /// Drop the connection and notify upward. No-op if already gone.
    fn teardown(&self, address: &str, reason: &str) {
        let link = {
            let mut state = self.state();
            let Some(link) = state.links.remove(address) else {
                return;
            };
            if let Some(device) = state.device_mut(address) {
                device.connected = false;
            }
            link
        };

        if let Some(monitor) = link.monitor {
            monitor.stop();
        }
        warn!("Classic device {} lost: {}", address, reason);
        (self.on_disconnect)(self.device_id(address));
    }
}
