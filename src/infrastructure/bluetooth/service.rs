//! Bluetooth Service Module
//!
//! Executes [`BleCommand`]s against the WinRT Bluetooth stack. Commands are
//! processed one at a time; results are reported as [`BleEvent`]s.

use crate::domain::identifiers::DeviceAddress;
use crate::domain::models::{BleCommand, BleEvent};
use crate::infrastructure::bluetooth::{connection::DeviceConnection, scanner::BleScanner};
use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

pub struct BluetoothService {
    scanner: BleScanner,
    connections: HashMap<DeviceAddress, DeviceConnection>,
    event_sender: mpsc::UnboundedSender<BleEvent>,
    scan_duration: Option<Duration>,
    scan_deadline: Option<Instant>,
}

impl BluetoothService {
    pub fn new(
        event_sender: mpsc::UnboundedSender<BleEvent>,
        scan_duration: Option<Duration>,
    ) -> Self {
        Self {
            scanner: BleScanner::new(event_sender.clone()),
            connections: HashMap::new(),
            event_sender,
            scan_duration,
            scan_deadline: None,
        }
    }

    /// Spawn the service on its own thread with a single-threaded runtime.
    pub fn spawn(
        event_sender: mpsc::UnboundedSender<BleEvent>,
        commands: mpsc::UnboundedReceiver<BleCommand>,
        scan_duration: Option<Duration>,
    ) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("bluetooth".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create tokio runtime for Bluetooth: {}", e);
                        return;
                    }
                };
                rt.block_on(BluetoothService::new(event_sender, scan_duration).run(commands));
            })
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BleCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    debug!("BLE command: {:?}", command);
                    if let Err(e) = self.handle(command).await {
                        error!("BLE command failed: {:#}", e);
                    }
                }
                _ = scan_timeout(self.scan_deadline) => {
                    self.scan_deadline = None;
                    if let Err(e) = self.scanner.stop() {
                        error!("Failed to stop BLE scan: {:#}", e);
                    }
                }
            }
        }

        self.disconnect_all();
        let _ = self.scanner.stop();
        info!("Bluetooth command channel closed");
    }

    async fn handle(&mut self, command: BleCommand) -> Result<()> {
        match command {
            BleCommand::StartScan => {
                self.scanner.start()?;
                self.scan_deadline = self.scan_duration.map(|d| Instant::now() + d);
                Ok(())
            }
            BleCommand::Connect(address) => self.connect(address).await,
            BleCommand::DisconnectAll => {
                self.disconnect_all();
                Ok(())
            }
            BleCommand::DiscoverServices(address) => {
                self.connection_mut(&address)?.discover().await
            }
            BleCommand::ReadCharacteristic(id) => self.connection(&id.address)?.read(id).await,
            BleCommand::WriteCharacteristic { id, value } => {
                self.connection(&id.address)?.write(id, &value).await
            }
            BleCommand::RegisterNotify(id) => {
                self.connection_mut(&id.address)?.register_notify(id).await
            }
            BleCommand::UnregisterNotify(id) => match self.connections.get_mut(&id.address) {
                Some(connection) => connection.unregister_notify(id).await,
                // Already closed along with its registrations
                None => Ok(()),
            },
        }
    }

    async fn connect(&mut self, address: DeviceAddress) -> Result<()> {
        if self.connections.contains_key(&address) {
            debug!("Already connecting or connected to {}", address);
            return Ok(());
        }

        let connection = DeviceConnection::open(address, self.event_sender.clone()).await?;
        self.connections.insert(address, connection);
        Ok(())
    }

    fn disconnect_all(&mut self) {
        if !self.connections.is_empty() {
            info!("Disconnecting {} BLE device(s)", self.connections.len());
        }
        for (_, connection) in self.connections.drain() {
            connection.close();
        }
    }

    fn connection(&self, address: &DeviceAddress) -> Result<&DeviceConnection> {
        self.connections
            .get(address)
            .ok_or_else(|| anyhow::anyhow!("No connection to {}", address))
    }

    fn connection_mut(&mut self, address: &DeviceAddress) -> Result<&mut DeviceConnection> {
        self.connections
            .get_mut(address)
            .ok_or_else(|| anyhow::anyhow!("No connection to {}", address))
    }
}

async fn scan_timeout(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scan_timeout_fires_at_deadline() {
        let deadline = Instant::now() + Duration::from_secs(30);
        let timeout = tokio::time::timeout(Duration::from_secs(29), scan_timeout(Some(deadline)));
        assert!(timeout.await.is_err());
        assert!(tokio::time::timeout(Duration::from_secs(2), scan_timeout(Some(deadline)))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_without_deadline_never_times_out() {
        let timeout = tokio::time::timeout(Duration::from_secs(3600), scan_timeout(None));
        assert!(timeout.await.is_err());
    }
}
