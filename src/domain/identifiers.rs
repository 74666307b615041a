//! Identifier Codec
//!
//! Canonical string forms for device addresses and attribute UUIDs, and the
//! inverse parse of a base topic back into its three identifiers.
//!
//! ```text
//! AABBCCDDEEFF / 00001801-0000-1000-8000-00805f9b34fb / 2a19
//! └─ address ─┘  └──────────── service ──────────────┘  └ char ┘
//! ```

use crate::domain::error::CodecError;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Separator between topic segments. Never produced by either string form.
pub const TOPIC_SEPARATOR: char = '/';

/// 6-byte Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Build from the 48-bit integer form used by some platform stacks.
    pub fn from_u64(raw: u64) -> Self {
        let be = raw.to_be_bytes();
        Self([be[2], be[3], be[4], be[5], be[6], be[7]])
    }

    pub fn to_u64(&self) -> u64 {
        let b = self.0;
        u64::from_be_bytes([0, 0, b[0], b[1], b[2], b[3], b[4], b[5]])
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for DeviceAddress {
    type Err = CodecError;

    /// Accepts `AABBCCDDEEFF` and `AA:BB:CC:DD:EE:FF`, in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CodecError::MalformedAddress(s.to_string());

        let bare: String = match s.len() {
            12 => s.to_string(),
            17 => {
                let colons_in_place = s
                    .char_indices()
                    .filter(|(i, _)| i % 3 == 2)
                    .all(|(_, c)| c == ':');
                if !colons_in_place {
                    return Err(malformed());
                }
                s.char_indices()
                    .filter(|(i, _)| i % 3 != 2)
                    .map(|(_, c)| c)
                    .collect()
            }
            _ => return Err(malformed()),
        };

        let mut bytes = [0u8; 6];
        hex::decode_to_slice(&bare, &mut bytes).map_err(|_| malformed())?;
        Ok(Self(bytes))
    }
}

pub fn address_to_string(address: &DeviceAddress) -> String {
    address.to_string()
}

pub fn string_to_address(s: &str) -> Result<DeviceAddress, CodecError> {
    s.parse()
}

/// Service or characteristic identifier.
///
/// Short forms are kept as-is rather than expanded against the Bluetooth
/// base UUID, so each width has its own distinct string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeUuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128(Uuid),
}

impl From<Uuid> for AttributeUuid {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid128(uuid)
    }
}

impl fmt::Display for AttributeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid16(v) => write!(f, "{:04x}", v),
            Self::Uuid32(v) => write!(f, "{:08x}", v),
            Self::Uuid128(uuid) => write!(f, "{}", uuid.hyphenated()),
        }
    }
}

impl FromStr for AttributeUuid {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CodecError::MalformedUuid(s.to_string());

        match s.len() {
            4 => {
                let mut bytes = [0u8; 2];
                hex::decode_to_slice(s, &mut bytes).map_err(|_| malformed())?;
                Ok(Self::Uuid16(u16::from_be_bytes(bytes)))
            }
            8 => {
                let mut bytes = [0u8; 4];
                hex::decode_to_slice(s, &mut bytes).map_err(|_| malformed())?;
                Ok(Self::Uuid32(u32::from_be_bytes(bytes)))
            }
            32 | 36 => Uuid::parse_str(s)
                .map(Self::Uuid128)
                .map_err(|_| malformed()),
            _ => Err(malformed()),
        }
    }
}

pub fn uuid_to_string(uuid: &AttributeUuid) -> String {
    uuid.to_string()
}

pub fn string_to_uuid(s: &str) -> Result<AttributeUuid, CodecError> {
    s.parse()
}

/// Split a base topic into its address, service and characteristic.
///
/// Exactly three non-empty segments are required, and every segment must
/// decode. Any failure is reported as [`CodecError::MalformedTopic`].
pub fn parse_topic(
    topic: &str,
) -> Result<(DeviceAddress, AttributeUuid, AttributeUuid), CodecError> {
    let malformed = || CodecError::MalformedTopic(topic.to_string());

    let segments: Vec<&str> = topic.split(TOPIC_SEPARATOR).collect();
    let [address, service, characteristic] = segments.as_slice() else {
        return Err(malformed());
    };
    if address.is_empty() || service.is_empty() || characteristic.is_empty() {
        return Err(malformed());
    }

    let address = string_to_address(address).map_err(|_| malformed())?;
    let service = string_to_uuid(service).map_err(|_| malformed())?;
    let characteristic = string_to_uuid(characteristic).map_err(|_| malformed())?;

    Ok((address, service, characteristic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::topics::base_topic;

    const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";

    fn sample_address() -> DeviceAddress {
        DeviceAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
    }

    #[test]
    fn test_address_string_forms() {
        let address = sample_address();
        assert_eq!(address_to_string(&address), "AABBCCDDEEFF");
        assert_eq!(string_to_address("AA:BB:CC:DD:EE:FF").unwrap(), address);
        assert_eq!(string_to_address("aabbccddeeff").unwrap(), address);
    }

    #[test]
    fn test_address_rejects_bad_layout() {
        for input in ["", "AABBCCDDEE", "AA-BB-CC-DD-EE-FF", "AABBCCDDEEFG", "AA:BBC:CD:DE:EFF"] {
            assert_eq!(
                string_to_address(input),
                Err(CodecError::MalformedAddress(input.to_string())),
                "{input}"
            );
        }
    }

    #[test]
    fn test_address_u64_conversion() {
        let address = DeviceAddress::from_u64(0xAABB_CCDD_EEFF);
        assert_eq!(address, sample_address());
        assert_eq!(address.to_u64(), 0xAABB_CCDD_EEFF);
    }

    #[test]
    fn test_uuid_string_forms() {
        let long = string_to_uuid(BATTERY_SERVICE).unwrap();
        assert_eq!(uuid_to_string(&long), BATTERY_SERVICE);

        let upper = string_to_uuid(&BATTERY_SERVICE.to_uppercase()).unwrap();
        assert_eq!(upper, long);

        let simple = string_to_uuid("0000180f00001000800000805f9b34fb").unwrap();
        assert_eq!(simple, long);

        assert_eq!(string_to_uuid("2A19").unwrap(), AttributeUuid::Uuid16(0x2a19));
        assert_eq!(uuid_to_string(&AttributeUuid::Uuid16(0x2a19)), "2a19");
        assert_eq!(uuid_to_string(&AttributeUuid::Uuid32(0x1234abcd)), "1234abcd");
    }

    #[test]
    fn test_uuid_rejects_garbage() {
        for input in ["", "+fff", "12345", "zzzz", "0000180f-0000-1000-8000-00805f9b34f"] {
            assert!(
                matches!(string_to_uuid(input), Err(CodecError::MalformedUuid(_))),
                "{input}"
            );
        }
    }

    #[test]
    fn test_parse_topic_round_trips_base_topic() {
        let address = sample_address();
        let cases = [
            (AttributeUuid::Uuid16(0x1801), AttributeUuid::Uuid16(0x2a05)),
            (AttributeUuid::Uuid32(0x0000_180f), AttributeUuid::Uuid16(0x2a19)),
            (string_to_uuid(BATTERY_SERVICE).unwrap(), AttributeUuid::Uuid32(0xdead_beef)),
        ];

        for (service, characteristic) in cases {
            let topic = base_topic(&address, &service, &characteristic);
            assert_eq!(parse_topic(&topic).unwrap(), (address, service, characteristic));
        }
    }

    #[test]
    fn test_parse_topic_requires_three_segments() {
        for topic in [
            "AABBCCDDEEFF",
            "AABBCCDDEEFF/1801",
            "AABBCCDDEEFF/1801/2a05/Set",
            "AABBCCDDEEFF//2a05",
            "/1801/2a05",
            "AABBCCDDEEFF/1801/",
            "",
        ] {
            assert_eq!(
                parse_topic(topic),
                Err(CodecError::MalformedTopic(topic.to_string())),
                "{topic}"
            );
        }
    }

    #[test]
    fn test_parse_topic_reports_bad_segment_as_topic_error() {
        let topic = "AABBCCDDEEFF/not-a-uuid/2a05";
        assert_eq!(
            parse_topic(topic),
            Err(CodecError::MalformedTopic(topic.to_string()))
        );
    }
}
