//! Infrastructure Module
//!
//! Transport adapters and process-level concerns.
//!
//! - [`mqtt`] - `rumqttc` MQTT transport
//! - [`network`] - Broker reachability monitoring
//! - [`bluetooth`] - WinRT BLE transport (Windows only)
//! - [`logging`] - `tracing` subscriber setup

#[cfg(windows)]
pub mod bluetooth;
pub mod logging;
pub mod mqtt;
pub mod network;
