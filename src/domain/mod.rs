//! Domain types: the unified device model and application settings.

pub mod models;
pub mod settings;
