mod common;

use bt_bridge::domain::models::{BridgeEvent, DiscoveryFilters};
use bt_bridge::error::BridgeError;
use common::*;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const KEYBOARD: &str = "AA:AA:AA:AA:AA:AA";

fn disconnected(device_id: &str) -> BridgeEvent {
    BridgeEvent::DeviceDisconnected {
        device_id: device_id.to_string(),
    }
}

async fn connected_harness() -> Harness {
    let h = Harness::new(
        FakeClassic::with_devices(vec![classic_device(KEYBOARD, "Keyboard")]),
        FakeRadio::with_adverts(vec![advert("pen", "Pen")]),
    );
    h.bridge
        .discover_devices(&DiscoveryFilters::default())
        .await
        .unwrap();
    h.bridge
        .connect_device(&format!("classic_{}", KEYBOARD))
        .await
        .unwrap();
    h.bridge.connect_device("ble_pen").await.unwrap();
    h
}

#[tokio::test(start_paused = true)]
async fn test_classic_link_loss_is_reported() {
    let mut h = connected_harness().await;
    let start = Instant::now();

    sleep(Duration::from_secs(12)).await;
    assert!(h.events.try_recv().is_err());

    h.classic.drop_link(KEYBOARD);
    let event = h.events.recv().await.unwrap();

    assert_eq!(event, disconnected(&format!("classic_{}", KEYBOARD)));
    assert!(start.elapsed() >= Duration::from_secs(14));
    let live = h.bridge.get_connected_devices();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, "ble_pen");
}

#[tokio::test(start_paused = true)]
async fn test_ble_tolerates_a_single_failed_probe() {
    let mut h = connected_harness().await;

    h.radio.set_healthy("pen", false);
    sleep(Duration::from_secs(4)).await;
    h.radio.set_healthy("pen", true);
    sleep(Duration::from_secs(10)).await;

    assert!(h.events.try_recv().is_err());
    assert_eq!(h.bridge.get_connected_devices().len(), 2);
    assert!(h.radio.rssi_reads() >= 4);
}

#[tokio::test(start_paused = true)]
async fn test_ble_two_failed_probes_disconnect() {
    let mut h = connected_harness().await;
    let start = Instant::now();

    h.radio.set_healthy("pen", false);
    let event = h.events.recv().await.unwrap();

    assert_eq!(event, disconnected("ble_pen"));
    assert!(start.elapsed() >= Duration::from_secs(6));
    assert!(h
        .bridge
        .get_connected_devices()
        .iter()
        .all(|d| d.id != "ble_pen"));

    // The monitor is gone with the link
    let reads = h.radio.rssi_reads();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.radio.rssi_reads(), reads);
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_ble_disconnect_is_reported_once() {
    let mut h = connected_harness().await;

    h.radio.report_disconnect("pen");
    assert_eq!(h.events.recv().await.unwrap(), disconnected("ble_pen"));

    h.radio.report_disconnect("pen");
    sleep(Duration::from_secs(10)).await;
    assert!(h.events.try_recv().is_err());

    let err = h.bridge.send_data("ble_pen", b"x").await.unwrap_err();
    assert!(matches!(err, BridgeError::NotConnected(_)));
}

#[tokio::test(start_paused = true)]
async fn test_voluntary_disconnect_emits_no_event() {
    let mut h = connected_harness().await;
    h.radio.set_healthy("pen", false);

    h.bridge.disconnect_device("ble_pen").await.unwrap();
    h.bridge
        .disconnect_device(&format!("classic_{}", KEYBOARD))
        .await
        .unwrap();
    h.radio.report_disconnect("pen");
    sleep(Duration::from_secs(20)).await;

    assert!(h.events.try_recv().is_err());
    assert!(h.bridge.get_connected_devices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_aborts_remaining_chunks() {
    let h = connected_harness().await;

    let bridge = h.bridge.clone();
    let send = tokio::spawn(async move {
        bridge
            .send_data("ble_pen", &[0x01, 0x1B, 0x7E, 0x44, 200, 0x02])
            .await
    });
    sleep(Duration::from_millis(50)).await;
    h.radio.report_disconnect("pen");

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::NotConnected(_)));
    let writes = h.radio.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].data, vec![0x01]);
}
