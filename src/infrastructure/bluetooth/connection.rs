//! Connection Support
//!
//! Pieces shared by both transport adapters: the per-connection health
//! monitor handle, the disconnect callback type and the chunked transmit
//! loop that turns codec output into timed writes.

use crate::domain::settings::Settings;
use crate::error::{BridgeError, Result};
use crate::infrastructure::bluetooth::protocol::{self, Chunk};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upward notification carrying a namespaced device id
pub type DisconnectCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Liveness probe configuration
#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub interval: Duration,
    /// Consecutive failed probes before the link is declared lost
    pub failure_threshold: u32,
}

impl HealthConfig {
    pub fn classic(settings: &Settings) -> Self {
        Self {
            interval: Duration::from_millis(settings.health.classic_interval_ms),
            failure_threshold: 1,
        }
    }

    pub fn ble(settings: &Settings) -> Self {
        Self {
            interval: Duration::from_millis(settings.health.ble_interval_ms),
            failure_threshold: settings.health.ble_failure_threshold.max(1),
        }
    }
}

/// Bounds on the waits a payload may request
#[derive(Debug, Clone, Copy)]
pub struct SendLimits {
    pub max_delay: Duration,
    pub max_total_delay: Duration,
}

impl SendLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_delay: Duration::from_millis(settings.send.max_delay_ms),
            max_total_delay: Duration::from_millis(settings.send.max_total_delay_ms),
        }
    }
}

impl Default for SendLimits {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Handle to a running liveness probe task
#[derive(Debug)]
pub struct HealthMonitor {
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn the probe loop. Must be called within a Tokio runtime.
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(task),
        }
    }

    /// Cancel the probe. A probe suspended mid round-trip never resumes.
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Write codec output in order, waiting on each `Delay`.
///
/// Before each data chunk `is_live` is consulted so a link torn down
/// mid-send aborts the remaining chunks. Returns the data bytes written.
pub(crate) async fn transmit<L, W, Fut>(
    device_id: &str,
    chunks: Vec<Chunk>,
    limits: &SendLimits,
    mut is_live: L,
    mut write: W,
) -> Result<usize>
where
    L: FnMut() -> bool,
    W: FnMut(Vec<u8>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    debug!(
        "Sending {} bytes to {} in {} chunks",
        protocol::data_len(&chunks),
        device_id,
        chunks.len()
    );
    let mut bytes_sent = 0;
    let mut waited = Duration::ZERO;

    for chunk in chunks {
        match chunk {
            Chunk::Delay(ms) => {
                let requested = Duration::from_millis(u64::from(ms));
                let wait = requested
                    .min(limits.max_delay)
                    .min(limits.max_total_delay.saturating_sub(waited));
                if wait < requested {
                    warn!(
                        "Delay of {}ms to {} capped to {}ms",
                        ms,
                        device_id,
                        wait.as_millis()
                    );
                }
                if !wait.is_zero() {
                    debug!("Delaying {}ms", wait.as_millis());
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
            }
            Chunk::Data(bytes) => {
                if !is_live() {
                    warn!(
                        "{} went away mid-send after {} bytes",
                        device_id, bytes_sent
                    );
                    return Err(BridgeError::NotConnected(device_id.to_string()));
                }
                let len = bytes.len();
                write(bytes).await?;
                bytes_sent += len;
                debug!("Sent {} bytes to {}", len, device_id);
            }
        }
    }

    Ok(bytes_sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::encode;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn limits(max_delay_ms: u64, max_total_delay_ms: u64) -> SendLimits {
        SendLimits {
            max_delay: Duration::from_millis(max_delay_ms),
            max_total_delay: Duration::from_millis(max_total_delay_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_interleaves_waits() {
        let start = Instant::now();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chunks = encode(&[0x01, 0x02, 0x1B, 0x7E, 0x44, 100, 0x03]);

        let sink = log.clone();
        let sent = transmit("ble_x", chunks, &limits(255, 10_000), || true, |bytes| {
            sink.lock().unwrap().push((start.elapsed(), bytes));
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(sent, 3);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1, vec![0x01, 0x02]);
        assert!(log[0].0 < Duration::from_millis(1));
        assert_eq!(log[1].1, vec![0x03]);
        assert!(log[1].0 >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_caps_cumulative_delay() {
        let start = Instant::now();
        let mut payload = Vec::new();
        for _ in 0..10 {
            payload.extend_from_slice(&[0x1B, 0x7E, 0x44, 200]);
        }
        payload.push(0xAA);

        transmit("classic_x", encode(&payload), &limits(100, 250), || true, |_| async {
            Ok(())
        })
        .await
        .unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_transmit_aborts_when_link_drops() {
        let chunks = encode(&[0x01, 0x1B, 0x7E, 0x44, 0x00, 0x02]);
        let mut checks = 0;
        let result = transmit(
            "ble_x",
            chunks,
            &SendLimits::default(),
            || {
                checks += 1;
                checks == 1
            },
            |_| async { Ok(()) },
        )
        .await;

        assert!(matches!(result, Err(BridgeError::NotConnected(id)) if id == "ble_x"));
    }

    #[tokio::test]
    async fn test_transmit_propagates_write_failure() {
        let result = transmit("ble_x", encode(b"abc"), &SendLimits::default(), || true, |_| async {
            Err(BridgeError::adapter("GATT write failed"))
        })
        .await;

        assert!(matches!(result, Err(BridgeError::AdapterFailure(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stop_cancels_task() {
        let monitor = HealthMonitor::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
        assert!(monitor.is_running());

        monitor.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!monitor.is_running());
    }
}
