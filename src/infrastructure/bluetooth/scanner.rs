//! BLE Scanner Module
//!
//! Reports every advertising peripheral; connection decisions are made by
//! the bridge, not here.

use crate::domain::identifiers::DeviceAddress;
use crate::domain::models::BleEvent;
use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

pub struct BleScanner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
    event_sender: mpsc::UnboundedSender<BleEvent>,
}

impl BleScanner {
    pub fn new(event_sender: mpsc::UnboundedSender<BleEvent>) -> Self {
        Self {
            watcher: None,
            event_sender,
        }
    }

    /// Start (or restart) active scanning
    pub fn start(&mut self) -> Result<()> {
        self.stop()?;
        info!("Starting BLE scan");

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let sender = self.event_sender.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let address = DeviceAddress::from_u64(args.BluetoothAddress()?);
                    let _ = sender.send(BleEvent::DeviceDiscovered(address));
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);

        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE scan");
            watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
