//! In-memory platform collaborators for integration tests.
//!
//! Both fakes record every call so tests can assert on the full command
//! history without a Bluetooth stack.

#![allow(dead_code)]

use async_trait::async_trait;
use bt_bridge::domain::models::{BleDeviceInfo, BridgeEvent, ClassicDeviceInfo};
use bt_bridge::error::{BridgeError, Result};
use bt_bridge::infrastructure::bluetooth::platform::{
    BleRadio, CharacteristicInfo, ClassicPlatform, RadioState, WriteMode,
};
use bt_bridge::infrastructure::bluetooth::service::BridgeConfig;
use bt_bridge::infrastructure::bluetooth::BridgeService;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

// ── Builders ─────────────────────────────────────────────────

pub fn classic_device(address: &str, name: &str) -> ClassicDeviceInfo {
    ClassicDeviceInfo {
        name: name.to_string(),
        address: address.to_string(),
        paired: true,
        connected: false,
    }
}

pub fn advert(id: &str, name: &str) -> BleDeviceInfo {
    BleDeviceInfo {
        id: id.to_string(),
        name: name.to_string(),
        address: format!("addr-{}", id),
        rssi: Some(-60),
    }
}

pub fn characteristic(uuid: &str, write: bool, write_without_response: bool) -> CharacteristicInfo {
    CharacteristicInfo {
        service: "0000ffe0-0000-1000-8000-00805f9b34fb".to_string(),
        uuid: uuid.to_string(),
        write,
        write_without_response,
    }
}

// ── Classic fake ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ClassicCall {
    Discover,
    Connect(String),
    Disconnect(String),
    Write(String, Vec<u8>),
}

#[derive(Default)]
pub struct FakeClassic {
    devices: Mutex<Vec<ClassicDeviceInfo>>,
    linked: Mutex<HashSet<String>>,
    calls: Mutex<Vec<ClassicCall>>,
    fail_discovery: AtomicBool,
}

impl FakeClassic {
    pub fn with_devices(devices: Vec<ClassicDeviceInfo>) -> Self {
        let fake = Self::default();
        fake.set_devices(devices);
        fake
    }

    pub fn set_devices(&self, devices: Vec<ClassicDeviceInfo>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn set_discovery_failure(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    /// Simulate the OS dropping the link; the next probe sees it gone
    pub fn drop_link(&self, address: &str) {
        self.linked.lock().unwrap().remove(address);
    }

    pub fn calls(&self) -> Vec<ClassicCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ClassicCall::Write(_, data) => Some(data),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ClassicCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ClassicPlatform for FakeClassic {
    async fn discover(&self) -> Result<Vec<ClassicDeviceInfo>> {
        self.record(ClassicCall::Discover);
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(BridgeError::adapter("bluetoothctl exited with 1"));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn connect(&self, address: &str) -> Result<()> {
        self.record(ClassicCall::Connect(address.to_string()));
        self.linked.lock().unwrap().insert(address.to_string());
        Ok(())
    }

    async fn disconnect(&self, address: &str) -> Result<()> {
        self.record(ClassicCall::Disconnect(address.to_string()));
        self.linked.lock().unwrap().remove(address);
        Ok(())
    }

    async fn is_connected(&self, address: &str) -> Result<bool> {
        Ok(self.linked.lock().unwrap().contains(address))
    }

    async fn write(&self, address: &str, data: &[u8]) -> Result<()> {
        self.record(ClassicCall::Write(address.to_string(), data.to_vec()));
        Ok(())
    }
}

// ── BLE fake ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RadioCall {
    StartScan,
    StopScan,
    Connect(String),
    Disconnect(String),
}

#[derive(Debug, Clone)]
pub struct RadioWrite {
    pub id: String,
    pub uuid: String,
    pub data: Vec<u8>,
    pub mode: WriteMode,
    pub at: Instant,
}

pub struct FakeRadio {
    state: Mutex<RadioState>,
    adverts: Mutex<Vec<BleDeviceInfo>>,
    characteristics: Mutex<Vec<CharacteristicInfo>>,
    unhealthy: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RadioCall>>,
    writes: Mutex<Vec<RadioWrite>>,
    rssi_reads: AtomicUsize,
    fail_scan: AtomicBool,
    fail_characteristics_once: AtomicBool,
    characteristic_queries: AtomicUsize,
    disconnect_sink: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Default for FakeRadio {
    fn default() -> Self {
        Self {
            state: Mutex::new(RadioState::PoweredOn),
            adverts: Mutex::new(Vec::new()),
            characteristics: Mutex::new(vec![characteristic("ffe1", true, false)]),
            unhealthy: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            rssi_reads: AtomicUsize::new(0),
            fail_scan: AtomicBool::new(false),
            fail_characteristics_once: AtomicBool::new(false),
            characteristic_queries: AtomicUsize::new(0),
            disconnect_sink: Mutex::new(None),
        }
    }
}

impl FakeRadio {
    pub fn with_adverts(adverts: Vec<BleDeviceInfo>) -> Self {
        let fake = Self::default();
        fake.set_adverts(adverts);
        fake
    }

    pub fn set_adverts(&self, adverts: Vec<BleDeviceInfo>) {
        *self.adverts.lock().unwrap() = adverts;
    }

    pub fn set_state(&self, state: RadioState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_scan_failure(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// Make the next characteristic discovery fail
    pub fn fail_next_characteristics(&self) {
        self.fail_characteristics_once.store(true, Ordering::SeqCst);
    }

    pub fn characteristic_queries(&self) -> usize {
        self.characteristic_queries.load(Ordering::SeqCst)
    }

    pub fn set_characteristics(&self, characteristics: Vec<CharacteristicInfo>) {
        *self.characteristics.lock().unwrap() = characteristics;
    }

    /// Make RSSI probes for `id` fail (or succeed again)
    pub fn set_healthy(&self, id: &str, healthy: bool) {
        let mut unhealthy = self.unhealthy.lock().unwrap();
        if healthy {
            unhealthy.remove(id);
        } else {
            unhealthy.insert(id.to_string());
        }
    }

    /// Push an unsolicited link-loss notification, as the OS stack would
    pub fn report_disconnect(&self, id: &str) {
        if let Some(sink) = self.disconnect_sink.lock().unwrap().as_ref() {
            sink.send(id.to_string()).unwrap();
        }
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<RadioWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn rssi_reads(&self) -> usize {
        self.rssi_reads.load(Ordering::SeqCst)
    }

    fn record(&self, call: RadioCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BleRadio for FakeRadio {
    async fn state(&self) -> Result<RadioState> {
        Ok(*self.state.lock().unwrap())
    }

    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<BleDeviceInfo>> {
        self.record(RadioCall::StartScan);
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(BridgeError::adapter("BLE error: scan rejected"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for advert in self.adverts.lock().unwrap().iter() {
            let _ = tx.send(advert.clone());
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(RadioCall::StopScan);
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<()> {
        self.record(RadioCall::Connect(id.to_string()));
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        self.record(RadioCall::Disconnect(id.to_string()));
        Ok(())
    }

    async fn characteristics(&self, _id: &str) -> Result<Vec<CharacteristicInfo>> {
        self.characteristic_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_characteristics_once.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::adapter("GATT services not resolved"));
        }
        Ok(self.characteristics.lock().unwrap().clone())
    }

    async fn write(
        &self,
        id: &str,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        self.writes.lock().unwrap().push(RadioWrite {
            id: id.to_string(),
            uuid: characteristic.uuid.clone(),
            data: data.to_vec(),
            mode,
            at: Instant::now(),
        });
        Ok(())
    }

    async fn read_rssi(&self, id: &str) -> Result<Option<i16>> {
        self.rssi_reads.fetch_add(1, Ordering::SeqCst);
        if self.unhealthy.lock().unwrap().contains(id) {
            return Err(BridgeError::NotConnected(id.to_string()));
        }
        Ok(Some(-55))
    }

    fn subscribe_disconnects(&self, sink: mpsc::UnboundedSender<String>) {
        *self.disconnect_sink.lock().unwrap() = Some(sink);
    }
}

// ── Harness ──────────────────────────────────────────────────

pub const SCAN_WINDOW: Duration = Duration::from_millis(100);

pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        scan_duration: SCAN_WINDOW,
        ..BridgeConfig::default()
    }
}

pub struct Harness {
    pub bridge: Arc<BridgeService>,
    pub classic: Arc<FakeClassic>,
    pub radio: Arc<FakeRadio>,
    pub events: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl Harness {
    pub fn new(classic: FakeClassic, radio: FakeRadio) -> Self {
        Self::with_config(classic, radio, test_config())
    }

    pub fn with_config(classic: FakeClassic, radio: FakeRadio, config: BridgeConfig) -> Self {
        let classic = Arc::new(classic);
        let radio = Arc::new(radio);
        let (events_tx, events) = mpsc::unbounded_channel();
        let bridge = BridgeService::new(classic.clone(), radio.clone(), events_tx, config);
        Self {
            bridge: Arc::new(bridge),
            classic,
            radio,
            events,
        }
    }
}
