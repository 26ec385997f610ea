//! Bluetooth bridge
//!
//! Exposes classic and BLE peripherals to WebSocket clients through a
//! unified device registry.

pub mod app;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod presentation;

pub use app::AppContext;
pub use error::{BridgeError, Result};
