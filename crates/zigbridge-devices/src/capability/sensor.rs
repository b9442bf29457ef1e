//! Sensor capability. Read-only.

use zigbridge_core::error::Result;

use super::{CapabilityId, CapabilityLayer, DeviceTarget};

/// Sensor readings for one endpoint.
pub struct Sensor<'a> {
    layer: &'a CapabilityLayer,
    target: DeviceTarget,
}

impl<'a> Sensor<'a> {
    pub(super) fn new(layer: &'a CapabilityLayer, target: DeviceTarget) -> Self {
        Self { layer, target }
    }

    fn read_f64(&self, cap: CapabilityId) -> Result<Option<f64>> {
        tracing::debug!(target_device = %self.target, capability = %cap, "Reading sensor");
        Ok(self.layer.read(self.target, cap)?.and_then(|v| v.as_f64()))
    }

    /// Temperature in °C.
    pub fn get_temperature(&self) -> Result<Option<f64>> {
        self.read_f64(CapabilityId::Temperature)
    }

    /// Relative humidity in %.
    pub fn get_humidity(&self) -> Result<Option<f64>> {
        self.read_f64(CapabilityId::Humidity)
    }

    pub fn get_occupancy(&self) -> Result<Option<bool>> {
        Ok(self
            .layer
            .read(self.target, CapabilityId::Occupancy)?
            .and_then(|v| v.as_bool()))
    }

    /// Battery remaining, 0-100 %.
    pub fn get_battery(&self) -> Result<Option<u8>> {
        Ok(self
            .layer
            .read(self.target, CapabilityId::Battery)?
            .and_then(|v| v.as_i64())
            .map(|v| v.clamp(0, 100) as u8))
    }
}
