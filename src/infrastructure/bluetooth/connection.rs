//! BLE Connection Module
//!
//! One connected peripheral: GATT session, characteristic table, and the
//! WinRT event registrations that feed [`BleEvent`]s back to the router.

use crate::domain::identifiers::{AttributeUuid, DeviceAddress};
use crate::domain::models::{BleEvent, CharacteristicId};
use crate::infrastructure::bluetooth::protocol;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus, GattSession,
    GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;

type CharacteristicKey = (AttributeUuid, AttributeUuid);

pub struct DeviceConnection {
    address: DeviceAddress,
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    status_token: i64,
    /// Whether `DeviceConnected` was reported without a matching `DeviceDisconnected`
    reported_connected: Arc<AtomicBool>,
    characteristics: HashMap<CharacteristicKey, GattCharacteristic>,
    notify_tokens: HashMap<CharacteristicKey, i64>,
    event_sender: mpsc::UnboundedSender<BleEvent>,
}

impl DeviceConnection {
    /// Open the device and keep its link up.
    ///
    /// Connection state changes, including the initial connect, are reported
    /// as events rather than through the return value.
    pub async fn open(
        address: DeviceAddress,
        event_sender: mpsc::UnboundedSender<BleEvent>,
    ) -> Result<Self> {
        info!("Connecting to Bluetooth device: {}", address);

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address.to_u64())?
            .await
            .with_context(|| format!("Device {} not reachable", address))?;

        let reported_connected = Arc::new(AtomicBool::new(false));
        let status_token = {
            let sender = event_sender.clone();
            let reported = reported_connected.clone();
            device.ConnectionStatusChanged(&TypedEventHandler::new(
                move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                    if let Some(dev) = dev.as_ref() {
                        match dev.ConnectionStatus()? {
                            BluetoothConnectionStatus::Connected => {
                                if !reported.swap(true, Ordering::SeqCst) {
                                    let _ = sender.send(BleEvent::DeviceConnected(address));
                                }
                            }
                            _ => {
                                if reported.swap(false, Ordering::SeqCst) {
                                    let _ = sender.send(BleEvent::DeviceDisconnected(address));
                                }
                            }
                        }
                    }
                    Ok(())
                },
            ))?
        };

        // A maintained session keeps Windows from dropping the idle link
        let session = match GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await {
            Ok(session) => {
                session.SetMaintainConnection(true)?;
                Some(session)
            }
            Err(e) => {
                warn!("Failed to create GattSession for {}: {}", address, e);
                None
            }
        };

        let connection = Self {
            address,
            device,
            session,
            status_token,
            reported_connected,
            characteristics: HashMap::new(),
            notify_tokens: HashMap::new(),
            event_sender,
        };

        if connection.is_connected()
            && !connection.reported_connected.swap(true, Ordering::SeqCst)
        {
            let _ = connection
                .event_sender
                .send(BleEvent::DeviceConnected(address));
        }

        Ok(connection)
    }

    pub fn is_connected(&self) -> bool {
        self.device
            .ConnectionStatus()
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }

    /// Enumerate every service and characteristic, reporting each one.
    pub async fn discover(&mut self) -> Result<()> {
        let services_result = self
            .device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if services_result.Status()? != GattCommunicationStatus::Success {
            anyhow::bail!(
                "Failed to get GATT services of {}: {:?}",
                self.address,
                services_result.Status()?
            );
        }

        self.characteristics.clear();
        let services = services_result.Services()?;
        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let service_uuid = protocol::attribute_uuid(service.Uuid()?);

            let chars_result = service
                .GetCharacteristicsWithCacheModeAsync(BluetoothCacheMode::Uncached)?
                .await?;
            if chars_result.Status()? != GattCommunicationStatus::Success {
                warn!(
                    "Skipping service {} on {}: {:?}",
                    service_uuid,
                    self.address,
                    chars_result.Status()?
                );
                continue;
            }

            let characteristics = chars_result.Characteristics()?;
            for j in 0..characteristics.Size()? {
                let characteristic = characteristics.GetAt(j)?;
                let char_uuid = protocol::attribute_uuid(characteristic.Uuid()?);
                let properties = protocol::properties(characteristic.CharacteristicProperties()?);

                self.characteristics
                    .insert((service_uuid, char_uuid), characteristic);
                let _ = self.event_sender.send(BleEvent::CharacteristicFound {
                    id: CharacteristicId::new(self.address, service_uuid, char_uuid),
                    properties,
                });
            }
        }

        info!(
            "Discovered {} characteristics on {}",
            self.characteristics.len(),
            self.address
        );
        let _ = self
            .event_sender
            .send(BleEvent::ServicesDiscovered(self.address));
        Ok(())
    }

    fn characteristic(&self, id: &CharacteristicId) -> Result<&GattCharacteristic> {
        self.characteristics
            .get(&(id.service, id.characteristic))
            .ok_or_else(|| anyhow::anyhow!("Unknown characteristic {}", id))
    }

    pub async fn read(&self, id: CharacteristicId) -> Result<()> {
        let characteristic = self.characteristic(&id)?;
        let result = characteristic
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if result.Status()? != GattCommunicationStatus::Success {
            anyhow::bail!("Read of {} failed: {:?}", id, result.Status()?);
        }

        let value = protocol::read_buffer(&result.Value()?)?;
        let _ = self
            .event_sender
            .send(BleEvent::CharacteristicValue { id, value });
        Ok(())
    }

    pub async fn write(&self, id: CharacteristicId, value: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(&id)?;
        let flags = characteristic.CharacteristicProperties()?;
        let option = if (flags.0 & GattCharacteristicProperties::Write.0) != 0 {
            GattWriteOption::WriteWithResponse
        } else {
            GattWriteOption::WriteWithoutResponse
        };

        let buffer = protocol::write_buffer(value)?;
        let status = characteristic
            .WriteValueWithOptionAsync(&buffer, option)?
            .await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Write to {} failed: {:?}", id, status);
        }
        debug!("Wrote {} bytes to {}", value.len(), id);
        Ok(())
    }

    pub async fn register_notify(&mut self, id: CharacteristicId) -> Result<()> {
        let key = (id.service, id.characteristic);
        if self.notify_tokens.contains_key(&key) {
            return Ok(());
        }

        let characteristic = self.characteristic(&id)?.clone();
        let flags = characteristic.CharacteristicProperties()?;
        let descriptor = if (flags.0 & GattCharacteristicProperties::Notify.0) != 0 {
            GattClientCharacteristicConfigurationDescriptorValue::Notify
        } else {
            GattClientCharacteristicConfigurationDescriptorValue::Indicate
        };

        let sender = self.event_sender.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    if let Ok(value) = protocol::read_buffer(&args.CharacteristicValue()?) {
                        let _ = sender.send(BleEvent::CharacteristicValue { id, value });
                    }
                }
                Ok(())
            },
        );
        let token = characteristic.ValueChanged(&handler)?;

        let status = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(descriptor)?
            .await?;
        if status != GattCommunicationStatus::Success {
            characteristic.RemoveValueChanged(token)?;
            anyhow::bail!("Enabling notifications on {} failed: {:?}", id, status);
        }

        self.notify_tokens.insert(key, token);
        debug!("Notifications enabled on {}", id);
        Ok(())
    }

    pub async fn unregister_notify(&mut self, id: CharacteristicId) -> Result<()> {
        let Some(token) = self.notify_tokens.remove(&(id.service, id.characteristic)) else {
            return Ok(());
        };
        let characteristic = self.characteristic(&id)?;
        characteristic.RemoveValueChanged(token)?;

        if self.is_connected() {
            characteristic
                .WriteClientCharacteristicConfigurationDescriptorAsync(
                    GattClientCharacteristicConfigurationDescriptorValue::None,
                )?
                .await?;
        }
        debug!("Notifications disabled on {}", id);
        Ok(())
    }

    /// Drop the link and report the disconnect if a connect was reported.
    pub fn close(self) {
        let _ = self.device.RemoveConnectionStatusChanged(self.status_token);
        for ((service, characteristic), token) in &self.notify_tokens {
            if let Some(c) = self.characteristics.get(&(*service, *characteristic)) {
                let _ = c.RemoveValueChanged(*token);
            }
        }
        if let Some(session) = &self.session {
            let _ = session.Close();
        }
        let _ = self.device.Close();

        if self.reported_connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .event_sender
                .send(BleEvent::DeviceDisconnected(self.address));
        }
        info!("Closed connection to {}", self.address);
    }
}
