//! BLE to MQTT gateway.
//!
//! Exposes every connected peripheral's GATT characteristics as MQTT topics
//! and turns MQTT get/set requests into characteristic reads and writes.

pub mod domain;
pub mod infrastructure;
