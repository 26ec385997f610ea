//! WebSocket messaging gateway
//!
//! One task per client. Each client gets a writer task fed by an mpsc
//! queue, so request replies and broadcast pushes share a single sink.
//! Bridge events are serialised once and fanned out over a broadcast
//! channel to every open client.

use crate::domain::models::BridgeEvent;
use crate::domain::settings::GatewaySettings;
use crate::error::{BridgeError, Result};
use crate::infrastructure::bluetooth::BridgeService;
use crate::presentation::messages::{
    AddDeviceBody, ConnectBody, ConnectedDevicesBody, DisconnectBody, DiscoverBody, FailureBody,
    Request, RequestEnvelope, ResponseEnvelope, SendDataBody, StatusBody,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

const BROADCAST_CAPACITY: usize = 100;

/// Bind `host:base_port`, moving up one port at a time while the port is
/// taken, for at most `max_retries` extra attempts.
pub async fn bind(host: &str, base_port: u16, max_retries: u16) -> Result<TcpListener> {
    let last_port = base_port.saturating_add(max_retries);
    for port in base_port..=last_port {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                if port != base_port {
                    info!("Port {} in use, bound {} instead", base_port, port);
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!("Port {} is in use, trying {}", port, port.saturating_add(1));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(BridgeError::BindExhausted {
        first_port: base_port,
        last_port,
    })
}

pub struct Gateway {
    listener: TcpListener,
    bridge: Arc<BridgeService>,
    broadcast_tx: broadcast::Sender<String>,
}

impl Gateway {
    pub async fn bind(settings: &GatewaySettings, bridge: Arc<BridgeService>) -> Result<Self> {
        let listener = bind(&settings.host, settings.port, settings.max_bind_retries).await?;
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Ok(Self {
            listener,
            bridge,
            broadcast_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Relay bridge events to every connected client.
    pub fn forward_events(&self, mut events: mpsc::UnboundedReceiver<BridgeEvent>) -> JoinHandle<()> {
        let broadcast_tx = self.broadcast_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let envelope = match &event {
                    BridgeEvent::DeviceDisconnected { device_id } => {
                        ResponseEnvelope::device_disconnected(device_id)
                    }
                };
                match envelope.to_text() {
                    Ok(text) => {
                        // No receivers just means no client is connected
                        let reached = broadcast_tx.send(text).unwrap_or(0);
                        debug!("Broadcast {:?} to {} clients", event, reached);
                    }
                    Err(e) => error!("Failed to serialise {:?}: {}", event, e),
                }
            }
        })
    }

    /// Accept clients until `shutdown` resolves, then close them all.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut clients = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Gateway shutting down, closing {} clients", clients.len());
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        clients.spawn(serve_client(
                            stream,
                            peer,
                            self.bridge.clone(),
                            self.broadcast_tx.clone(),
                        ));
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
            }
        }

        clients.shutdown().await;
        Ok(())
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    bridge: Arc<BridgeService>,
    broadcast_tx: broadcast::Sender<String>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    info!("Client connected: {}", peer);

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Subscribe before the greeting so no broadcast after it is missed
    let mut broadcast_rx = broadcast_tx.subscribe();
    let push_tx = out_tx.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(text) => {
                    if push_tx.send(text).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Client {} missed {} broadcasts", peer, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    send(&out_tx, ResponseEnvelope::connected());

    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    send(&out_tx, ResponseEnvelope::error(e));
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Client {} read error: {}", peer, e);
                break;
            }
        };
        let reply = handle_message(&bridge, &text).await;
        send(&out_tx, reply);
    }

    forward_task.abort();
    drop(out_tx);
    let _ = writer.await;
    info!("Client disconnected: {}", peer);
}

fn send(out_tx: &mpsc::UnboundedSender<String>, envelope: ResponseEnvelope) {
    match envelope.to_text() {
        Ok(text) => {
            let _ = out_tx.send(text);
        }
        Err(e) => error!("Failed to serialise {} reply: {}", envelope.kind, e),
    }
}

/// Decode one client message, run it against the bridge, and build the reply.
pub async fn handle_message(bridge: &BridgeService, text: &str) -> ResponseEnvelope {
    let envelope = match RequestEnvelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => return ResponseEnvelope::error(e),
    };
    let reply = match Request::from_envelope(&envelope) {
        Ok(request) => {
            debug!("Dispatching {}", envelope.kind);
            let kind = request.response_type();
            ResponseEnvelope::response(kind, dispatch(bridge, request).await)
        }
        Err(e) => {
            warn!("Rejected message: {}", e);
            ResponseEnvelope::error(e)
        }
    };
    reply.with_message_id(envelope.message_id)
}

async fn dispatch(bridge: &BridgeService, request: Request) -> Value {
    match request {
        Request::Discover { filters } => body(bridge.discover_devices(&filters).await.map(|devices| {
            DiscoverBody {
                success: true,
                devices,
            }
        })),
        Request::Connect { device_id } => body(bridge.connect_device(&device_id).await.map(
            |connected| ConnectBody {
                success: true,
                device_id: connected.device_id,
                name: connected.name,
                kind: connected.kind,
            },
        )),
        Request::Disconnect { device_id } => {
            let result = bridge.disconnect_device(&device_id).await;
            body(result.map(|()| DisconnectBody {
                success: true,
                device_id,
            }))
        }
        Request::GetConnected => body(Ok(ConnectedDevicesBody {
            success: true,
            devices: bridge.get_connected_devices(),
        })),
        Request::SendData { device_id, data } => {
            let result = bridge.send_data(&device_id, &data).await;
            body(result.map(|report| SendDataBody {
                success: true,
                device_id,
                bytes_sent: report.bytes_sent,
                kind: report.kind,
            }))
        }
        Request::AddDevice { device } => body(Ok(AddDeviceBody {
            success: true,
            device_id: bridge.add_discovered_device(device),
        })),
        Request::ClearDevices => {
            bridge.clear_discovered_devices();
            body(Ok(StatusBody { success: true }))
        }
    }
}

/// Serialise a successful body, or fold the error into `{success:false, error}`.
fn body<T: Serialize>(result: Result<T>) -> Value {
    let value = match result {
        Ok(ok) => serde_json::to_value(ok),
        Err(e) => {
            warn!("Operation failed: {}", e);
            serde_json::to_value(FailureBody::new(e))
        }
    };
    value.unwrap_or_else(|e| serde_json::json!({ "success": false, "error": e.to_string() }))
}
