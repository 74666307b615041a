//! Bluetooth Module
//!
//! WinRT implementation of the BLE transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │   (BleCommand in, BleEvent out, one command at a time)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌──────────────┐  ┌──────────┐
//! │  Scanner  │  │  Connection  │  │ Protocol │
//! │           │  │ (per device) │  │          │
//! │ - adverts │  │ - GATT table │  │ - UUIDs  │
//! │           │  │ - read/write │  │ - flags  │
//! │           │  │ - notify     │  │ - buffers│
//! └───────────┘  └──────────────┘  └──────────┘
//! ```

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;

pub use service::BluetoothService;
