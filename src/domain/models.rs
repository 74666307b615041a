use crate::domain::identifiers::{AttributeUuid, DeviceAddress};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Fully qualified characteristic: device, service and characteristic UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicId {
    pub address: DeviceAddress,
    pub service: AttributeUuid,
    pub characteristic: AttributeUuid,
}

impl CharacteristicId {
    pub fn new(
        address: DeviceAddress,
        service: AttributeUuid,
        characteristic: AttributeUuid,
    ) -> Self {
        Self {
            address,
            service,
            characteristic,
        }
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.address, self.service, self.characteristic)
    }
}

/// Characteristic properties as reported by discovery
///
/// Bit layout:
///   bit 0: Readable
///   bit 1: Writable (with or without response)
///   bit 2: Notifiable (notify or indicate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Properties(u8);

impl Properties {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);
    pub const NOTIFY: Self = Self(0x04);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0 && other.0 != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl BitOr for Properties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// MQTT delivery guarantee, configured as 0, 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("invalid QoS level {}, expected 0, 1 or 2", other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// Broker connection parameters carried by [`MqttCommand::Connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Events raised by the BLE transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    DeviceDiscovered(DeviceAddress),
    DeviceConnected(DeviceAddress),
    DeviceDisconnected(DeviceAddress),
    ServicesDiscovered(DeviceAddress),
    CharacteristicFound {
        id: CharacteristicId,
        properties: Properties,
    },
    /// Read result or notification; the bridge does not tell them apart.
    CharacteristicValue { id: CharacteristicId, value: Vec<u8> },
}

/// Requests to the BLE transport. Results come back as [`BleEvent`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleCommand {
    StartScan,
    Connect(DeviceAddress),
    DisconnectAll,
    DiscoverServices(DeviceAddress),
    ReadCharacteristic(CharacteristicId),
    WriteCharacteristic { id: CharacteristicId, value: Vec<u8> },
    RegisterNotify(CharacteristicId),
    UnregisterNotify(CharacteristicId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttEvent {
    Connected,
    Disconnected,
    MessageReceived { topic: String, payload: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttCommand {
    Connect(ConnectParams),
    Disconnect,
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: Qos,
        retain: bool,
    },
    Subscribe { topic: String, qos: Qos },
    Unsubscribe { topic: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Joined,
    Lost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_contains() {
        let props = Properties::READ | Properties::NOTIFY;
        assert!(props.contains(Properties::READ));
        assert!(props.contains(Properties::NOTIFY));
        assert!(!props.contains(Properties::WRITE));
        assert!(!props.contains(Properties::NONE));
        assert_eq!(props.bits(), 0x05);
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(Qos::try_from(2), Ok(Qos::ExactlyOnce));
        assert!(Qos::try_from(3).is_err());
        assert_eq!(serde_json::to_string(&Qos::AtMostOnce).unwrap(), "0");
        assert_eq!(serde_json::from_str::<Qos>("1").unwrap(), Qos::AtLeastOnce);
        assert!(serde_json::from_str::<Qos>("7").is_err());
    }
}
