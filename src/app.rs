//! Application context: the one bridge instance and its gateway, built once
//! at startup and passed to whatever needs them.

use crate::domain::models::BridgeEvent;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::platform::{BleRadio, ClassicPlatform};
use crate::infrastructure::bluetooth::service::BridgeConfig;
use crate::infrastructure::bluetooth::BridgeService;
use crate::infrastructure::system::{BtleplugRadio, SystemClassicPlatform};
use crate::presentation::Gateway;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub struct AppContext {
    settings: Settings,
    bridge: Arc<BridgeService>,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl AppContext {
    /// Must be called within a Tokio runtime.
    pub fn new(
        settings: Settings,
        classic: Arc<dyn ClassicPlatform>,
        radio: Arc<dyn BleRadio>,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let bridge = BridgeService::new(
            classic,
            radio,
            events_tx,
            BridgeConfig::from_settings(&settings),
        );
        Self {
            settings,
            bridge: Arc::new(bridge),
            events,
        }
    }

    /// Context backed by the host's Bluetooth stack
    pub fn with_system_platforms(settings: Settings) -> Self {
        Self::new(
            settings,
            Arc::new(SystemClassicPlatform::detect()),
            Arc::new(BtleplugRadio::new()),
        )
    }

    pub fn bridge(&self) -> Arc<BridgeService> {
        self.bridge.clone()
    }

    /// Serve clients until `shutdown` resolves, then drop every device link.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let gateway = Gateway::bind(&self.settings.gateway, self.bridge.clone()).await?;
        info!("Bridge gateway listening on ws://{}", gateway.local_addr()?);

        let forwarder = gateway.forward_events(self.events);
        let served = gateway.run(shutdown).await;
        forwarder.abort();

        info!("Disconnecting all devices...");
        self.bridge.disconnect_all().await;
        served?;
        Ok(())
    }
}
