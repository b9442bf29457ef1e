//! Light capability.

use zigbridge_core::error::Result;
use zigbridge_core::ids::CorrelationId;

use super::{BatchError, CapValue, CapabilityId, CapabilityLayer, DeviceTarget};

/// Light verbs for one endpoint.
pub struct Light<'a> {
    layer: &'a CapabilityLayer,
    target: DeviceTarget,
}

impl<'a> Light<'a> {
    pub(super) fn new(layer: &'a CapabilityLayer, target: DeviceTarget) -> Self {
        Self { layer, target }
    }

    pub fn on(&self) -> Result<CorrelationId> {
        tracing::info!(target_device = %self.target, "Turning on light");
        self.layer
            .write(self.target, CapabilityId::OnOff, CapValue::Bool(true))
    }

    pub fn off(&self) -> Result<CorrelationId> {
        tracing::info!(target_device = %self.target, "Turning off light");
        self.layer
            .write(self.target, CapabilityId::OnOff, CapValue::Bool(false))
    }

    pub fn toggle(&self) -> Result<CorrelationId> {
        tracing::info!(target_device = %self.target, "Toggling light");
        self.layer.toggle(self.target)
    }

    /// Move to a brightness level (0-254 after quirks).
    pub fn set_brightness(&self, brightness: u8) -> Result<CorrelationId> {
        tracing::info!(target_device = %self.target, brightness, "Setting brightness");
        self.layer.write(
            self.target,
            CapabilityId::Brightness,
            CapValue::Int(i64::from(brightness)),
        )
    }

    /// Move to a colour temperature in mireds.
    pub fn set_color_temp(&self, mireds: u16) -> Result<CorrelationId> {
        tracing::info!(target_device = %self.target, mireds, "Setting color temp");
        self.layer.write(
            self.target,
            CapabilityId::ColorTemp,
            CapValue::Int(i64::from(mireds)),
        )
    }

    /// Set hue and saturation, then brightness from `value`.
    ///
    /// Issues two commands and returns both correlation ids: the colour
    /// command first, the level command second. If the level command
    /// fails, the error carries the colour command's id.
    pub fn set_color_hsv(
        &self,
        hue: u8,
        saturation: u8,
        value: u8,
    ) -> std::result::Result<[CorrelationId; 2], BatchError> {
        tracing::info!(target_device = %self.target, hue, saturation, value, "Setting color HSV");
        let layer = self.layer;
        let hue = layer
            .correct_command(self.target.ieee, CapabilityId::Hue, CapValue::Int(i64::from(hue)))?
            .value;
        let saturation = layer
            .correct_command(
                self.target.ieee,
                CapabilityId::Saturation,
                CapValue::Int(i64::from(saturation)),
            )?
            .value;

        let color = layer.send_hue_saturation(self.target, hue, saturation)?;
        let level = self.set_brightness(value).map_err(|source| BatchError {
            issued: vec![color],
            source,
        })?;
        Ok([color, level])
    }

    pub fn get_state(&self) -> Result<Option<bool>> {
        Ok(self
            .layer
            .read(self.target, CapabilityId::OnOff)?
            .and_then(|v| v.as_bool()))
    }

    pub fn get_brightness(&self) -> Result<Option<u8>> {
        Ok(self
            .layer
            .read(self.target, CapabilityId::Brightness)?
            .and_then(|v| v.as_i64())
            .map(|v| v.clamp(0, 254) as u8))
    }

    pub fn get_color_temp(&self) -> Result<Option<u16>> {
        Ok(self
            .layer
            .read(self.target, CapabilityId::ColorTemp)?
            .and_then(|v| v.as_i64())
            .map(|v| v.clamp(0, i64::from(u16::MAX)) as u16))
    }
}
