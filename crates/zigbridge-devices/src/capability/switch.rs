//! Switch capability.

use zigbridge_core::error::Result;
use zigbridge_core::ids::CorrelationId;

use super::{CapValue, CapabilityId, CapabilityLayer, DeviceTarget};

/// On/off switch verbs for one endpoint.
pub struct Switch<'a> {
    layer: &'a CapabilityLayer,
    target: DeviceTarget,
}

impl<'a> Switch<'a> {
    pub(super) fn new(layer: &'a CapabilityLayer, target: DeviceTarget) -> Self {
        Self { layer, target }
    }

    pub fn on(&self) -> Result<CorrelationId> {
        tracing::info!(target_device = %self.target, "Turning on switch");
        self.layer
            .write(self.target, CapabilityId::OnOff, CapValue::Bool(true))
    }

    pub fn off(&self) -> Result<CorrelationId> {
        tracing::info!(target_device = %self.target, "Turning off switch");
        self.layer
            .write(self.target, CapabilityId::OnOff, CapValue::Bool(false))
    }

    pub fn toggle(&self) -> Result<CorrelationId> {
        tracing::info!(target_device = %self.target, "Toggling switch");
        self.layer.toggle(self.target)
    }

    pub fn get_state(&self) -> Result<Option<bool>> {
        Ok(self
            .layer
            .read(self.target, CapabilityId::OnOff)?
            .and_then(|v| v.as_bool()))
    }
}
