use anyhow::Result;
use bt_bridge::domain::settings::{Settings, SettingsService};
use bt_bridge::infrastructure::logging::init_logger;
use bt_bridge::AppContext;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bt-bridge")]
#[command(about = "WebSocket bridge to classic and BLE Bluetooth devices", long_about = None)]
#[command(version)]
struct Args {
    /// Gateway port (consecutive ports are tried if taken)
    #[arg(short, long)]
    port: Option<u16>,

    /// Gateway bind address
    #[arg(long)]
    host: Option<String>,

    /// Settings file instead of the per-user default
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,

    /// BLE scan window in milliseconds
    #[arg(long)]
    scan_ms: Option<u64>,

    /// Log to the console only
    #[arg(long)]
    no_file_log: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.gateway.port = port;
        }
        if let Some(host) = &self.host {
            settings.gateway.host = host.clone();
        }
        if let Some(level) = &self.log_level {
            settings.log_settings.level = level.clone();
        }
        if let Some(scan_ms) = self.scan_ms {
            settings.discovery.ble_scan_duration_ms = scan_ms;
        }
        if self.no_file_log {
            settings.log_settings.file_logging_enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings_service = match &args.config {
        Some(path) => SettingsService::from_path(path.clone()),
        None => SettingsService::new()?,
    };
    // Seed the file on first run, before CLI overrides are applied
    let seeded = if settings_service.path().exists() {
        Ok(())
    } else {
        settings_service.save()
    };
    args.apply(settings_service.get_mut());

    let _logging = init_logger(&settings_service.get().log_settings)?;
    info!("Starting Bluetooth bridge");
    info!("Settings file: {}", settings_service.path().display());
    if let Err(e) = seeded {
        warn!("Could not write default settings: {:#}", e);
    }

    let context = AppContext::with_system_platforms(settings_service.get().clone());
    context
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await?;

    info!("Bridge stopped");
    Ok(())
}
