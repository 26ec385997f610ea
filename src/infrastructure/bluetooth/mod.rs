//! Bluetooth Module
//!
//! Unified access to classic and BLE peripherals.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BridgeService                         │
//! │  (device registry - catalogs, connection table, events)  │
//! └───────────┬─────────────────────────────┬───────────────┘
//!             │                             │
//!             ▼                             ▼
//!     ┌───────────────┐             ┌───────────────┐
//!     │ ClassicAdapter│             │  BleAdapter   │
//!     │ - discovery   │             │ - scan        │
//!     │ - 5s liveness │             │ - GATT write  │
//!     └───────┬───────┘             │ - RSSI probe  │
//!             │                     └───────┬───────┘
//!             ▼                             ▼
//!     ClassicPlatform                   BleRadio
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Framed payload codec (data runs and delay directives)
//! - [`platform`] - Capability traits implemented by OS/radio backends
//! - [`connection`] - Health monitor handle and the chunked transmit loop
//! - [`classic`] - Classic transport adapter
//! - [`ble`] - BLE transport adapter
//! - [`service`] - Main service coordinator

pub mod ble;
pub mod classic;
pub mod connection;
pub mod platform;
pub mod protocol;
pub mod service;

// Re-export main service for convenience
pub use service::BridgeService;
