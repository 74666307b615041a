//! GATT Conversions
//!
//! Mapping between WinRT GATT types and the gateway's identifiers.

use crate::domain::identifiers::AttributeUuid;
use crate::domain::models::Properties;
use anyhow::Result;
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::GattCharacteristicProperties;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

/// Bluetooth Base UUID `00000000-0000-1000-8000-00805f9b34fb`; short UUIDs
/// occupy bits 96..128.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// WinRT always reports full 128-bit UUIDs.
pub fn attribute_uuid(guid: GUID) -> AttributeUuid {
    AttributeUuid::Uuid128(Uuid::from_u128(guid.to_u128()))
}

pub fn to_guid(uuid: &AttributeUuid) -> GUID {
    let raw = match uuid {
        AttributeUuid::Uuid16(short) => BLUETOOTH_BASE_UUID | (u128::from(*short) << 96),
        AttributeUuid::Uuid32(short) => BLUETOOTH_BASE_UUID | (u128::from(*short) << 96),
        AttributeUuid::Uuid128(full) => full.as_u128(),
    };
    GUID::from_u128(raw)
}

/// Fold the WinRT property flags into read/write/notify.
///
/// Write-without-response counts as writable, indicate as notifiable.
pub fn properties(flags: GattCharacteristicProperties) -> Properties {
    let has = |flag: GattCharacteristicProperties| (flags.0 & flag.0) != 0;

    let mut props = Properties::NONE;
    if has(GattCharacteristicProperties::Read) {
        props = props | Properties::READ;
    }
    if has(GattCharacteristicProperties::Write)
        || has(GattCharacteristicProperties::WriteWithoutResponse)
    {
        props = props | Properties::WRITE;
    }
    if has(GattCharacteristicProperties::Notify) || has(GattCharacteristicProperties::Indicate) {
        props = props | Properties::NOTIFY;
    }
    props
}

pub fn read_buffer(buffer: &IBuffer) -> Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

pub fn write_buffer(bytes: &[u8]) -> Result<IBuffer> {
    let writer = DataWriter::new()?;
    writer.WriteBytes(bytes)?;
    Ok(writer.DetachBuffer()?)
}
