//! Domain Module
//!
//! Transport-independent gateway logic.
//!
//! - [`identifiers`] - Address/UUID string forms and topic parsing
//! - [`topics`] - Topic layout and get/set decoration
//! - [`policy`] - Which discovered devices to connect
//! - [`bridge`] - Per-device attribute lifecycle
//! - [`router`] - Event dispatch between the transports and the bridge

pub mod bridge;
pub mod error;
pub mod identifiers;
pub mod models;
pub mod policy;
pub mod router;
pub mod settings;
pub mod topics;
