//! BLE radio backed by btleplug
//!
//! The platform manager and first adapter are opened lazily on first use,
//! at which point a background task starts forwarding
//! `DeviceDisconnected` events to the registered sink.

use crate::domain::models::{BleDeviceInfo, UNKNOWN_DEVICE_NAME};
use crate::error::{BridgeError, Result};
use crate::infrastructure::bluetooth::platform::{
    BleRadio, CharacteristicInfo, RadioState, WriteMode,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic,
    Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type DisconnectSink = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

struct Radio {
    // Held so the platform session outlives the adapter handle
    _manager: Manager,
    adapter: Adapter,
}

#[derive(Default)]
pub struct BtleplugRadio {
    radio: OnceCell<Radio>,
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
    disconnect_sink: DisconnectSink,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugRadio {
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&self) -> Result<&Adapter> {
        let radio = self
            .radio
            .get_or_try_init(|| async {
                let manager = Manager::new().await?;
                let adapter = manager
                    .adapters()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| BridgeError::RadioUnavailable("no Bluetooth adapter".into()))?;
                info!("Using BLE adapter: {}", adapter.adapter_info().await?);
                self.spawn_event_pump(&adapter).await?;
                Ok::<_, BridgeError>(Radio {
                    _manager: manager,
                    adapter,
                })
            })
            .await?;
        Ok(&radio.adapter)
    }

    async fn spawn_event_pump(&self, adapter: &Adapter) -> Result<()> {
        let mut events = adapter.events().await?;
        let sink = self.disconnect_sink.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    let id = id.to_string();
                    debug!("Radio reported {} disconnected", id);
                    let guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(tx) = guard.as_ref() {
                        let _ = tx.send(id);
                    }
                }
            }
            debug!("BLE central event stream ended");
        });
        Ok(())
    }

    fn peripherals(&self) -> MutexGuard<'_, HashMap<String, Peripheral>> {
        self.peripherals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peripheral(&self, id: &str) -> Result<Peripheral> {
        self.peripherals()
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::DeviceNotFound(id.to_string()))
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        wanted: &CharacteristicInfo,
    ) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid.to_string() == wanted.uuid && c.service_uuid.to_string() == wanted.service)
            .ok_or_else(|| BridgeError::adapter(format!("Characteristic {} not found", wanted.uuid)))
    }
}

fn describe(id: &PeripheralId, props: Option<PeripheralProperties>) -> BleDeviceInfo {
    let id = id.to_string();
    let (name, address, rssi) = match props {
        Some(props) => (props.local_name, Some(props.address), props.rssi),
        None => (None, None, None),
    };
    // CoreBluetooth hides addresses; fall back to the peripheral id
    let address = address
        .filter(|a| a.into_inner() != [0u8; 6])
        .map(|a| a.to_string())
        .unwrap_or_else(|| id.clone());
    BleDeviceInfo {
        name: name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
        address,
        rssi,
        id,
    }
}

#[async_trait]
impl BleRadio for BtleplugRadio {
    async fn state(&self) -> Result<RadioState> {
        let state = self.adapter().await?.adapter_state().await?;
        Ok(match state {
            CentralState::PoweredOn => RadioState::PoweredOn,
            CentralState::PoweredOff => RadioState::PoweredOff,
            _ => RadioState::Unknown,
        })
    }

    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<BleDeviceInfo>> {
        let adapter = self.adapter().await?.clone();
        let mut events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let peripherals = self.peripherals.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let props = peripheral.properties().await.ok().flatten();
                let info = describe(&id, props);
                peripherals
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(info.id.clone(), peripheral);
                if tx.send(info).is_err() {
                    break;
                }
            }
        });

        let previous = self
            .scan_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        let task = self
            .scan_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.adapter().await?.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<()> {
        let peripheral = self.peripheral(id)?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        self.peripheral(id)?.disconnect().await?;
        Ok(())
    }

    async fn characteristics(&self, id: &str) -> Result<Vec<CharacteristicInfo>> {
        let peripheral = self.peripheral(id)?;
        peripheral.discover_services().await?;
        Ok(peripheral
            .characteristics()
            .into_iter()
            .map(|c| CharacteristicInfo {
                service: c.service_uuid.to_string(),
                uuid: c.uuid.to_string(),
                write: c.properties.contains(CharPropFlags::WRITE),
                write_without_response: c
                    .properties
                    .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            })
            .collect())
    }

    async fn write(
        &self,
        id: &str,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let peripheral = self.peripheral(id)?;
        let target = Self::find_characteristic(&peripheral, characteristic)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        peripheral.write(&target, data, write_type).await?;
        Ok(())
    }

    async fn read_rssi(&self, id: &str) -> Result<Option<i16>> {
        let peripheral = self.peripheral(id)?;
        if !peripheral.is_connected().await? {
            return Err(BridgeError::NotConnected(id.to_string()));
        }
        let props = peripheral.properties().await?;
        Ok(props.and_then(|p| p.rssi))
    }

    fn subscribe_disconnects(&self, sink: mpsc::UnboundedSender<String>) {
        if self
            .disconnect_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(sink)
            .is_some()
        {
            warn!("Replacing existing BLE disconnect subscriber");
        }
    }
}
