//! Capability layer.
//!
//! Stable verbs (`on`, `set_brightness`, `get_temperature`, ...) mapped to
//! cluster attributes. Every value crossing this boundary passes through
//! the quirks engine. Writes are fire-and-forget: they return the
//! correlation id of the southbound command and the outcome arrives later
//! as a bus event. Reads return the last value stored in the device model.

mod light;
mod sensor;
mod switch;

pub use light::Light;
pub use sensor::Sensor;
pub use switch::Switch;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use zigbridge_core::error::{Error, Result};
use zigbridge_core::ids::{CorrelationId, Eui64};
use zigbridge_core::value::AttributeValue;

use crate::adapter::{ReportingConfig, SharedAdapter};
use crate::quirks::QuirkResult;
use crate::zcl::{attrs, cluster, ColorCommand, OnOffCommand};

/// Stable capability identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityId {
    OnOff,
    Brightness,
    ColorTemp,
    Hue,
    Saturation,
    Temperature,
    Humidity,
    Occupancy,
    Battery,
}

/// Value kind a capability carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Integer,
    Float,
}

impl CapabilityId {
    pub const ALL: [CapabilityId; 9] = [
        CapabilityId::OnOff,
        CapabilityId::Brightness,
        CapabilityId::ColorTemp,
        CapabilityId::Hue,
        CapabilityId::Saturation,
        CapabilityId::Temperature,
        CapabilityId::Humidity,
        CapabilityId::Occupancy,
        CapabilityId::Battery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnOff => "on_off",
            Self::Brightness => "brightness",
            Self::ColorTemp => "color_temp",
            Self::Hue => "hue",
            Self::Saturation => "saturation",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Occupancy => "occupancy",
            Self::Battery => "battery",
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::OnOff | Self::Occupancy => ValueKind::Bool,
            Self::Temperature | Self::Humidity => ValueKind::Float,
            _ => ValueKind::Integer,
        }
    }

    /// The (cluster, attribute) pair backing this capability.
    pub fn binding(&self) -> (u16, u16) {
        match self {
            Self::OnOff => (cluster::ON_OFF, attrs::ON_OFF),
            Self::Brightness => (cluster::LEVEL_CONTROL, attrs::CURRENT_LEVEL),
            Self::ColorTemp => (cluster::COLOR_CONTROL, attrs::COLOR_TEMPERATURE),
            Self::Hue => (cluster::COLOR_CONTROL, attrs::CURRENT_HUE),
            Self::Saturation => (cluster::COLOR_CONTROL, attrs::CURRENT_SATURATION),
            Self::Temperature => (cluster::TEMPERATURE_MEASUREMENT, attrs::MEASURED_VALUE),
            Self::Humidity => (cluster::HUMIDITY_MEASUREMENT, attrs::MEASURED_VALUE),
            Self::Occupancy => (cluster::OCCUPANCY_SENSING, attrs::OCCUPANCY),
            Self::Battery => (cluster::POWER_CONFIG, attrs::BATTERY_PERCENTAGE_REMAINING),
        }
    }

    /// Reverse of [`binding`](Self::binding).
    pub fn for_attribute(cluster: u16, attribute: u16) -> Option<CapabilityId> {
        Self::ALL
            .into_iter()
            .find(|cap| cap.binding() == (cluster, attribute))
    }

    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            Self::OnOff | Self::Brightness | Self::ColorTemp | Self::Hue | Self::Saturation
        )
    }

    /// Reporting parameters used unless a quirk overrides them.
    pub fn default_reporting(&self) -> ReportingConfig {
        match self {
            Self::OnOff | Self::Occupancy => ReportingConfig::new(0, 300, 0),
            Self::Brightness | Self::Hue | Self::Saturation => ReportingConfig::new(1, 300, 1),
            Self::ColorTemp => ReportingConfig::new(1, 300, 10),
            // 0.1 °C
            Self::Temperature => ReportingConfig::new(10, 300, 10),
            // 1 %RH
            Self::Humidity => ReportingConfig::new(10, 300, 100),
            Self::Battery => ReportingConfig::new(3600, 43200, 0),
        }
    }

    /// Convert a raw attribute into capability units.
    ///
    /// Temperature and humidity are hundredths, battery is half-percent,
    /// occupancy is bit 0. ZCL "invalid" sentinels yield `None`.
    pub fn from_attribute(&self, value: &AttributeValue) -> Option<CapValue> {
        match self {
            Self::OnOff => value
                .as_bool()
                .or_else(|| value.as_i64().map(|v| v != 0))
                .map(CapValue::Bool),
            Self::Occupancy => value
                .as_bool()
                .or_else(|| value.as_i64().map(|v| v & 0x01 != 0))
                .map(CapValue::Bool),
            Self::Temperature => match value {
                AttributeValue::I16(i16::MIN) => None,
                v => v.as_i64().map(|raw| CapValue::Float(raw as f64 / 100.0)),
            },
            Self::Humidity => match value {
                AttributeValue::U16(u16::MAX) => None,
                v => v.as_i64().map(|raw| CapValue::Float(raw as f64 / 100.0)),
            },
            Self::Battery => match value {
                AttributeValue::U8(u8::MAX) => None,
                v => v.as_i64().map(|raw| CapValue::Int(raw / 2)),
            },
            Self::Brightness | Self::ColorTemp | Self::Hue | Self::Saturation => {
                value.as_i64().map(CapValue::Int)
            }
        }
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|cap| cap.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown capability: {s}")))
    }
}

/// A capability value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl CapValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral view; floats are rounded half away from zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(v.round() as i64),
            Self::Bool(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for CapValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A multi-command call that stopped part way.
///
/// `issued` holds the commands already handed to the stack; their outcome
/// still arrives on the bus.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{source} ({} command(s) already issued)", .issued.len())]
pub struct BatchError {
    pub issued: Vec<CorrelationId>,
    #[source]
    pub source: Error,
}

impl From<Error> for BatchError {
    fn from(source: Error) -> Self {
        Self {
            issued: Vec::new(),
            source,
        }
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        err.source
    }
}

/// A device endpoint addressed by capability calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceTarget {
    pub ieee: Eui64,
    pub endpoint: u8,
}

impl DeviceTarget {
    pub fn new(ieee: Eui64, endpoint: u8) -> Self {
        Self { ieee, endpoint }
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ieee, self.endpoint)
    }
}

/// Entry point for capability calls.
#[derive(Clone)]
pub struct CapabilityLayer {
    adapter: SharedAdapter,
}

impl CapabilityLayer {
    pub fn new(adapter: SharedAdapter) -> Self {
        tracing::info!("Capability layer initialized");
        Self { adapter }
    }

    pub fn adapter(&self) -> &SharedAdapter {
        &self.adapter
    }

    pub fn light(&self, target: DeviceTarget) -> Light<'_> {
        Light::new(self, target)
    }

    pub fn switch(&self, target: DeviceTarget) -> Switch<'_> {
        Switch::new(self, target)
    }

    pub fn sensor(&self, target: DeviceTarget) -> Sensor<'_> {
        Sensor::new(self, target)
    }

    /// Manufacturer and model of a known device.
    fn identity(&self, ieee: Eui64) -> Result<(String, String)> {
        let model = self.adapter.model().read();
        let node = model
            .find_by_ieee(ieee)
            .ok_or_else(|| Error::NotFound(format!("device {ieee}")))?;
        Ok((node.manufacturer.clone(), node.model.clone()))
    }

    /// Run an outbound value through the quirks engine.
    pub fn correct_command(
        &self,
        ieee: Eui64,
        cap: CapabilityId,
        value: CapValue,
    ) -> Result<QuirkResult> {
        let (manufacturer, model) = self.identity(ieee)?;
        Ok(self
            .adapter
            .quirks()
            .apply_command(&manufacturer, &model, cap, value))
    }

    /// Stored value of a capability as the device reported it, with
    /// the device's manufacturer and model.
    fn stored(
        &self,
        target: DeviceTarget,
        cap: CapabilityId,
    ) -> Result<(String, String, Option<CapValue>)> {
        let (cluster, attribute) = cap.binding();
        let model = self.adapter.model().read();
        let node = model
            .find_by_ieee(target.ieee)
            .ok_or_else(|| Error::NotFound(format!("device {}", target.ieee)))?;
        let value = node
            .endpoint(target.endpoint)
            .and_then(|ep| ep.cluster(cluster))
            .and_then(|c| c.attribute(attribute))
            .and_then(|a| cap.from_attribute(a.value()));
        Ok((node.manufacturer.clone(), node.model.clone(), value))
    }

    /// Last known value of a capability, corrected by quirks.
    ///
    /// `Ok(None)` when the device has not reported the attribute yet.
    pub fn read(&self, target: DeviceTarget, cap: CapabilityId) -> Result<Option<CapValue>> {
        let (manufacturer, model, value) = self.stored(target, cap)?;
        let Some(value) = value else {
            return Ok(None);
        };
        let result = self
            .adapter
            .quirks()
            .apply_value(&manufacturer, &model, cap, value);
        Ok(Some(result.value))
    }

    /// Write a capability value: quirks, then the matching send primitive.
    pub fn write(
        &self,
        target: DeviceTarget,
        cap: CapabilityId,
        value: CapValue,
    ) -> Result<CorrelationId> {
        let result = self.correct_command(target.ieee, cap, value)?;
        if result.target != cap {
            tracing::debug!(
                ieee = %target.ieee,
                "Quirk remapped {} -> {}",
                cap,
                result.target
            );
        }
        self.dispatch(target, result.target, result.value)
    }

    fn dispatch(
        &self,
        target: DeviceTarget,
        cap: CapabilityId,
        value: CapValue,
    ) -> Result<CorrelationId> {
        let transition = self.adapter.default_transition_ds();
        let int_value = || {
            value.as_i64().ok_or_else(|| {
                Error::InvalidArgument(format!("{cap} expects a number, got {value}"))
            })
        };

        match cap {
            CapabilityId::OnOff => {
                let on = value
                    .as_bool()
                    .ok_or_else(|| Error::InvalidArgument(format!("on_off expects a bool, got {value}")))?;
                let command = if on { OnOffCommand::On } else { OnOffCommand::Off };
                self.adapter.send_on_off(target.ieee, target.endpoint, command)
            }
            CapabilityId::Brightness => {
                let level = int_value()?.clamp(0, 254) as u8;
                self.adapter
                    .send_level(target.ieee, target.endpoint, level, transition)
            }
            CapabilityId::ColorTemp => {
                let mireds = int_value()?.clamp(0, i64::from(u16::MAX)) as u16;
                self.adapter.send_color(
                    target.ieee,
                    target.endpoint,
                    ColorCommand::MoveToColorTemperature {
                        color_temp_mireds: mireds,
                        transition_time: transition,
                    },
                )
            }
            CapabilityId::Hue | CapabilityId::Saturation => {
                // A single component keeps the other at its last known value
                let other = if cap == CapabilityId::Hue {
                    CapabilityId::Saturation
                } else {
                    CapabilityId::Hue
                };
                let (manufacturer, model, stored) = self.stored(target, other)?;
                let other_value = self
                    .adapter
                    .quirks()
                    .apply_command(&manufacturer, &model, other, stored.unwrap_or(CapValue::Int(0)))
                    .value;
                if cap == CapabilityId::Hue {
                    self.send_hue_saturation(target, value, other_value)
                } else {
                    self.send_hue_saturation(target, other_value, value)
                }
            }
            read_only => Err(Error::InvalidArgument(format!(
                "{read_only} is read-only"
            ))),
        }
    }

    /// Send already-corrected hue and saturation as one colour command.
    fn send_hue_saturation(
        &self,
        target: DeviceTarget,
        hue: CapValue,
        saturation: CapValue,
    ) -> Result<CorrelationId> {
        let component = |v: CapValue| {
            v.as_i64()
                .map(|n| n.clamp(0, 254) as u8)
                .ok_or_else(|| Error::InvalidArgument(format!("colour component {v} is not numeric")))
        };
        self.adapter.send_color(
            target.ieee,
            target.endpoint,
            ColorCommand::MoveToHueAndSaturation {
                hue: component(hue)?,
                saturation: component(saturation)?,
                transition_time: self.adapter.default_transition_ds(),
            },
        )
    }

    /// Send a toggle. Toggle carries no value, so value quirks do not apply.
    pub fn toggle(&self, target: DeviceTarget) -> Result<CorrelationId> {
        self.identity(target.ieee)?;
        self.adapter
            .send_on_off(target.ieee, target.endpoint, OnOffCommand::Toggle)
    }

    /// Reporting parameters for a device capability, after quirks.
    pub fn reporting_for(&self, ieee: Eui64, cap: CapabilityId) -> Result<ReportingConfig> {
        let (manufacturer, model) = self.identity(ieee)?;
        Ok(self
            .adapter
            .quirks()
            .reporting_override(&manufacturer, &model, cap)
            .unwrap_or_else(|| cap.default_reporting()))
    }

    /// Configure attribute reporting for a capability.
    pub fn configure_reporting(
        &self,
        target: DeviceTarget,
        cap: CapabilityId,
    ) -> Result<CorrelationId> {
        let config = self.reporting_for(target.ieee, cap)?;
        let (cluster, attribute) = cap.binding();
        self.adapter
            .configure_reporting(target.ieee, target.endpoint, cluster, attribute, config)
    }

    /// Ask the device to report a capability's current value.
    pub fn refresh(&self, target: DeviceTarget, cap: CapabilityId) -> Result<CorrelationId> {
        let (cluster, attribute) = cap.binding();
        self.adapter
            .read_attributes(target.ieee, target.endpoint, cluster, &[attribute])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_roundtrip() {
        for cap in CapabilityId::ALL {
            let (cluster, attr) = cap.binding();
            assert_eq!(CapabilityId::for_attribute(cluster, attr), Some(cap));
        }
        assert_eq!(CapabilityId::for_attribute(0x0000, 0x0004), None);
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(
            CapabilityId::Temperature.from_attribute(&AttributeValue::I16(2150)),
            Some(CapValue::Float(21.5))
        );
        assert_eq!(
            CapabilityId::Temperature.from_attribute(&AttributeValue::I16(i16::MIN)),
            None
        );
        assert_eq!(
            CapabilityId::Humidity.from_attribute(&AttributeValue::U16(4550)),
            Some(CapValue::Float(45.5))
        );
        assert_eq!(
            CapabilityId::Battery.from_attribute(&AttributeValue::U8(151)),
            Some(CapValue::Int(75))
        );
        assert_eq!(
            CapabilityId::Occupancy.from_attribute(&AttributeValue::U8(0x03)),
            Some(CapValue::Bool(true))
        );
        assert_eq!(
            CapabilityId::OnOff.from_attribute(&AttributeValue::Bool(false)),
            Some(CapValue::Bool(false))
        );
        assert_eq!(
            CapabilityId::Brightness.from_attribute(&AttributeValue::String("x".into())),
            None
        );
    }

    #[test]
    fn test_names_parse() {
        for cap in CapabilityId::ALL {
            assert_eq!(cap.as_str().parse::<CapabilityId>().unwrap(), cap);
        }
        assert!("volume".parse::<CapabilityId>().is_err());
        assert_eq!(
            serde_json::to_value(CapabilityId::ColorTemp).unwrap(),
            "color_temp"
        );
    }

    #[test]
    fn test_cap_value_json_is_bare() {
        assert_eq!(serde_json::to_string(&CapValue::Int(128)).unwrap(), "128");
        assert_eq!(serde_json::to_string(&CapValue::Bool(true)).unwrap(), "true");
        assert_eq!(CapValue::Float(2.5).as_i64(), Some(3));
        assert_eq!(CapValue::Float(-2.5).as_i64(), Some(-3));
    }
}
