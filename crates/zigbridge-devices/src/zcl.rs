//! ZCL (Zigbee Cluster Library) definitions and attribute decoding.

use zigbridge_core::error::{Error, Result};
use zigbridge_core::value::AttributeValue;

/// Home Automation profile.
pub const PROFILE_HA: u16 = 0x0104;

/// Common ZCL cluster IDs
pub mod cluster {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const IDENTIFY: u16 = 0x0003;
    pub const ON_OFF: u16 = 0x0006;
    pub const LEVEL_CONTROL: u16 = 0x0008;
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const HUMIDITY_MEASUREMENT: u16 = 0x0405;
    pub const OCCUPANCY_SENSING: u16 = 0x0406;
}

/// Basic cluster attributes
pub mod basic_attrs {
    pub const ZCL_VERSION: u16 = 0x0000;
    pub const MANUFACTURER_NAME: u16 = 0x0004;
    pub const MODEL_IDENTIFIER: u16 = 0x0005;
    pub const POWER_SOURCE: u16 = 0x0007;
}

/// Attribute IDs of the clusters the capability layer maps.
pub mod attrs {
    pub const ON_OFF: u16 = 0x0000;
    pub const CURRENT_LEVEL: u16 = 0x0000;
    pub const CURRENT_HUE: u16 = 0x0000;
    pub const CURRENT_SATURATION: u16 = 0x0001;
    pub const COLOR_TEMPERATURE: u16 = 0x0007;
    pub const MEASURED_VALUE: u16 = 0x0000;
    pub const OCCUPANCY: u16 = 0x0000;
    pub const BATTERY_PERCENTAGE_REMAINING: u16 = 0x0021;
}

/// HA device type IDs
pub mod device_type {
    pub const ON_OFF_SWITCH: u16 = 0x0000;
    pub const ON_OFF_LIGHT: u16 = 0x0100;
    pub const DIMMABLE_LIGHT: u16 = 0x0101;
    pub const COLOR_DIMMABLE_LIGHT: u16 = 0x0102;
    pub const TEMPERATURE_SENSOR: u16 = 0x0302;
    pub const OCCUPANCY_SENSOR: u16 = 0x0107;
}

/// ZCL status codes
pub mod status {
    pub const SUCCESS: u16 = 0x00;
    pub const FAILURE: u16 = 0x01;
    pub const TIMEOUT: u16 = 0x94;
}

/// ZCL data type IDs
pub mod data_type {
    pub const BOOLEAN: u8 = 0x10;
    pub const BITMAP8: u8 = 0x18;
    pub const BITMAP16: u8 = 0x19;
    pub const UINT8: u8 = 0x20;
    pub const UINT16: u8 = 0x21;
    pub const UINT32: u8 = 0x23;
    pub const INT8: u8 = 0x28;
    pub const INT16: u8 = 0x29;
    pub const INT32: u8 = 0x2B;
    pub const ENUM8: u8 = 0x30;
    pub const OCTET_STRING: u8 = 0x41;
    pub const CHAR_STRING: u8 = 0x42;
}

/// On/Off cluster commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OnOffCommand {
    Off = 0x00,
    On = 0x01,
    Toggle = 0x02,
}

/// Color Control cluster commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorCommand {
    MoveToHueAndSaturation {
        hue: u8,
        saturation: u8,
        transition_time: u16,
    },
    MoveToColorTemperature {
        color_temp_mireds: u16,
        transition_time: u16,
    },
}

fn fixed<const N: usize>(type_id: u8, raw: &[u8]) -> Result<[u8; N]> {
    raw.try_into().map_err(|_| {
        Error::InvalidArgument(format!(
            "ZCL type 0x{type_id:02X} needs {N} bytes, got {}",
            raw.len()
        ))
    })
}

fn length_prefixed(type_id: u8, raw: &[u8]) -> Result<&[u8]> {
    let (&len, rest) = raw.split_first().ok_or_else(|| {
        Error::InvalidArgument(format!("ZCL type 0x{type_id:02X} missing length byte"))
    })?;
    // 0xFF marks an invalid (absent) string
    if len == 0xFF {
        return Ok(&[]);
    }
    rest.get(..usize::from(len)).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "ZCL string declares {len} bytes, {} available",
            rest.len()
        ))
    })
}

/// Decode a raw little-endian attribute payload by ZCL data type.
pub fn decode_attribute(type_id: u8, raw: &[u8]) -> Result<AttributeValue> {
    use data_type::*;

    let value = match type_id {
        BOOLEAN => match fixed::<1>(type_id, raw)?[0] {
            0x00 => AttributeValue::Bool(false),
            0x01 => AttributeValue::Bool(true),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "invalid ZCL boolean 0x{other:02X}"
                )))
            }
        },
        BITMAP8 | UINT8 | ENUM8 => AttributeValue::U8(fixed::<1>(type_id, raw)?[0]),
        BITMAP16 | UINT16 => AttributeValue::U16(u16::from_le_bytes(fixed(type_id, raw)?)),
        UINT32 => AttributeValue::U32(u32::from_le_bytes(fixed(type_id, raw)?)),
        INT8 => AttributeValue::I8(i8::from_le_bytes(fixed(type_id, raw)?)),
        INT16 => AttributeValue::I16(i16::from_le_bytes(fixed(type_id, raw)?)),
        INT32 => AttributeValue::I32(i32::from_le_bytes(fixed(type_id, raw)?)),
        OCTET_STRING => AttributeValue::Array(length_prefixed(type_id, raw)?.to_vec()),
        CHAR_STRING => {
            let bytes = length_prefixed(type_id, raw)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| Error::InvalidArgument(format!("ZCL string not UTF-8: {e}")))?;
            AttributeValue::String(s.to_string())
        }
        other => {
            return Err(Error::InvalidArgument(format!(
                "unsupported ZCL data type 0x{other:02X}"
            )))
        }
    };
    Ok(value)
}
