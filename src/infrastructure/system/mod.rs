//! Concrete platform backends for the adapter capability traits.
//!
//! - [`classic_cli`] - classic discovery/connect via OS tooling
//! - [`btleplug_radio`] - BLE scan, GATT and liveness via btleplug

pub mod btleplug_radio;
pub mod classic_cli;

pub use btleplug_radio::BtleplugRadio;
pub use classic_cli::SystemClassicPlatform;
