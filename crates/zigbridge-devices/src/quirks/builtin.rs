//! Built-in quirk table.

use super::{QuirkAction, QuirkEntry};
use crate::adapter::ReportingConfig;
use crate::capability::CapabilityId;

/// Entries registered before any user-supplied quirks.
pub fn builtin_quirks() -> Vec<QuirkEntry> {
    vec![
        // Level 0 switches these bulbs off instead of dimming
        QuirkEntry::new("IKEA of Sweden", "TRADFRI bulb")
            .prefix()
            .with_action(QuirkAction::ClampRange {
                target: CapabilityId::Brightness,
                min: 1,
                max: 254,
            }),
        // Relay reports and accepts on/off inverted
        QuirkEntry::new("_TZ3000_ji4araar", "TS0001").with_action(QuirkAction::InvertBoolean {
            target: CapabilityId::OnOff,
            enabled: true,
        }),
        // Reports battery already in percent
        QuirkEntry::new("_TZ3000_ji4araar", "TS0202")
            .with_action(QuirkAction::ScaleNumeric {
                target: CapabilityId::Battery,
                multiplier: 2.0,
                offset: 0.0,
            })
            .with_action(QuirkAction::ClampRange {
                target: CapabilityId::Battery,
                min: 0,
                max: 100,
            }),
        QuirkEntry::new("LUMI", "lumi.weather").with_action(QuirkAction::OverrideReporting {
            target: CapabilityId::Temperature,
            reporting: ReportingConfig::new(10, 3600, 50),
        }),
        // Battery voltage reports are unreliable; keep the last good value
        QuirkEntry::new("LUMI", "lumi.sensor_motion")
            .prefix()
            .with_action(QuirkAction::IgnoreSpurious {
                target: CapabilityId::Battery,
            }),
    ]
}

#[cfg(test)]
mod tests {
    use super::super::QuirksEngine;
    use super::*;
    use crate::capability::CapValue;

    #[test]
    fn test_builtin_table_registers() {
        let engine = QuirksEngine::with_builtin();
        assert_eq!(engine.len(), builtin_quirks().len());
    }

    #[test]
    fn test_tradfri_never_dims_to_zero() {
        let engine = QuirksEngine::with_builtin();
        let result = engine.apply_command(
            "IKEA of Sweden",
            "TRADFRI bulb E27 WS opal 980lm",
            CapabilityId::Brightness,
            CapValue::Int(0),
        );
        assert_eq!(result.value, CapValue::Int(1));
    }
}
