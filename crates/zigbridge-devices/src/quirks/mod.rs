//! Device quirks.
//!
//! Table-driven corrections for devices that deviate from the Zigbee
//! Cluster Library. Entries match on manufacturer and model; the first
//! matching entry in registration order wins, so an exact-model entry only
//! takes precedence over a prefix entry for the same manufacturer when it
//! is registered first.
//!
//! Applying quirks is a pure function of (device identity, capability,
//! value); the engine never mutates anything while evaluating.

mod builtin;

pub use builtin::builtin_quirks;

use serde::{Deserialize, Serialize};
use std::fmt;

use zigbridge_core::config::limits;
use zigbridge_core::error::{Error, Result};

use crate::adapter::ReportingConfig;
use crate::capability::{CapValue, CapabilityId, ValueKind};

/// How an entry's model string is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMatch {
    #[default]
    Exact,
    Prefix,
}

/// One corrective action. Each action applies only to its target capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuirkAction {
    ClampRange {
        target: CapabilityId,
        min: i32,
        max: i32,
    },
    InvertBoolean {
        target: CapabilityId,
        enabled: bool,
    },
    ScaleNumeric {
        target: CapabilityId,
        multiplier: f64,
        #[serde(default)]
        offset: f64,
    },
    RemapAttribute {
        target: CapabilityId,
        to: CapabilityId,
    },
    OverrideReporting {
        target: CapabilityId,
        reporting: ReportingConfig,
    },
    IgnoreSpurious {
        target: CapabilityId,
    },
}

impl QuirkAction {
    pub fn target(&self) -> CapabilityId {
        match self {
            Self::ClampRange { target, .. }
            | Self::InvertBoolean { target, .. }
            | Self::ScaleNumeric { target, .. }
            | Self::RemapAttribute { target, .. }
            | Self::OverrideReporting { target, .. }
            | Self::IgnoreSpurious { target } => *target,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ClampRange { .. } => "clamp_range",
            Self::InvertBoolean { .. } => "invert_boolean",
            Self::ScaleNumeric { .. } => "scale_numeric",
            Self::RemapAttribute { .. } => "remap_attribute",
            Self::OverrideReporting { .. } => "override_reporting",
            Self::IgnoreSpurious { .. } => "ignore_spurious",
        }
    }
}

impl fmt::Display for QuirkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClampRange { target, min, max } => write!(f, "{target}: clamp [{min}, {max}]"),
            Self::InvertBoolean { target, enabled } => {
                write!(f, "{target}: invert (enabled={enabled})")
            }
            Self::ScaleNumeric {
                target,
                multiplier,
                offset,
            } => write!(f, "{target}: x{multiplier} + {offset}"),
            Self::RemapAttribute { target, to } => write!(f, "{target}: remap -> {to}"),
            Self::OverrideReporting { target, reporting } => write!(
                f,
                "{target}: reporting {}s..{}s change {}",
                reporting.min_interval_s, reporting.max_interval_s, reporting.reportable_change
            ),
            Self::IgnoreSpurious { target } => write!(f, "{target}: ignore spurious"),
        }
    }
}

/// A manufacturer/model rule with its ordered actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuirkEntry {
    pub manufacturer: String,
    pub model: String,
    #[serde(default, rename = "match")]
    pub match_mode: ModelMatch,
    pub actions: Vec<QuirkAction>,
}

impl QuirkEntry {
    pub fn new(manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
            match_mode: ModelMatch::Exact,
            actions: Vec::new(),
        }
    }

    pub fn prefix(mut self) -> Self {
        self.match_mode = ModelMatch::Prefix;
        self
    }

    pub fn with_action(mut self, action: QuirkAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn matches(&self, manufacturer: &str, model: &str) -> bool {
        self.manufacturer == manufacturer
            && match self.match_mode {
                ModelMatch::Exact => self.model == model,
                ModelMatch::Prefix => model.starts_with(&self.model),
            }
    }
}

/// Outcome of applying quirks to one value.
#[derive(Debug, Clone, PartialEq)]
pub struct QuirkResult {
    /// An entry matched the device.
    pub matched: bool,
    /// Actions that changed the value or its handling.
    pub actions_applied: usize,
    pub value: CapValue,
    /// Capability the value should be written to.
    pub target: CapabilityId,
    pub reporting: Option<ReportingConfig>,
    /// The update must be dropped without propagation.
    pub ignored: bool,
}

impl QuirkResult {
    fn unchanged(cap: CapabilityId, value: CapValue) -> Self {
        Self {
            matched: false,
            actions_applied: 0,
            value,
            target: cap,
            reporting: None,
            ignored: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Reports and reads from the device.
    Inbound,
    /// Values about to be sent.
    Outbound,
}

/// Quirk table and evaluator.
#[derive(Debug, Clone)]
pub struct QuirksEngine {
    entries: Vec<QuirkEntry>,
    max_entries: usize,
}

impl QuirksEngine {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            max_entries: limits::MAX_QUIRKS,
        }
    }

    /// Table preloaded with the built-in entries.
    pub fn with_builtin() -> Self {
        let mut engine = Self::new();
        for entry in builtin_quirks() {
            if let Err(e) = engine.register(entry) {
                tracing::error!("Built-in quirk rejected: {}", e);
            }
        }
        tracing::info!(count = engine.len(), "Quirks initialized");
        engine
    }

    /// Append an entry. Later entries have lower precedence.
    pub fn register(&mut self, entry: QuirkEntry) -> Result<()> {
        if entry.manufacturer.is_empty() || entry.model.is_empty() {
            return Err(Error::InvalidArgument(
                "quirk needs manufacturer and model".into(),
            ));
        }
        if entry.actions.len() > limits::QUIRK_MAX_ACTIONS {
            return Err(Error::InvalidArgument(format!(
                "quirk {}/{} has {} actions (max {})",
                entry.manufacturer,
                entry.model,
                entry.actions.len(),
                limits::QUIRK_MAX_ACTIONS
            )));
        }
        for action in &entry.actions {
            if let QuirkAction::ClampRange { min, max, .. } = action {
                if min > max {
                    return Err(Error::InvalidArgument(format!(
                        "clamp range [{min}, {max}] is empty"
                    )));
                }
            }
        }
        if self.entries.len() >= self.max_entries {
            return Err(Error::ResourceExhausted(format!(
                "quirk table ({} entries)",
                self.max_entries
            )));
        }
        tracing::debug!(
            manufacturer = %entry.manufacturer,
            model = %entry.model,
            actions = entry.actions.len(),
            "Quirk registered"
        );
        self.entries.push(entry);
        Ok(())
    }

    /// Register `[[quirks]]` tables from the configuration file.
    pub fn register_from_config(&mut self, tables: &[toml::Value]) -> Result<usize> {
        for table in tables {
            let entry: QuirkEntry = table
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| Error::Config(format!("invalid quirk: {e}")))?;
            self.register(entry)?;
        }
        Ok(tables.len())
    }

    /// First entry matching the device, in registration order.
    pub fn find(&self, manufacturer: &str, model: &str) -> Option<&QuirkEntry> {
        self.entries.iter().find(|e| e.matches(manufacturer, model))
    }

    /// Correct a value reported by (or read from) a device.
    pub fn apply_value(
        &self,
        manufacturer: &str,
        model: &str,
        cap: CapabilityId,
        value: CapValue,
    ) -> QuirkResult {
        self.apply(Direction::Inbound, manufacturer, model, cap, value)
    }

    /// Correct a value before it is encoded into a command.
    pub fn apply_command(
        &self,
        manufacturer: &str,
        model: &str,
        cap: CapabilityId,
        value: CapValue,
    ) -> QuirkResult {
        self.apply(Direction::Outbound, manufacturer, model, cap, value)
    }

    /// Reporting parameters from an `override_reporting` action, if any.
    pub fn reporting_override(
        &self,
        manufacturer: &str,
        model: &str,
        cap: CapabilityId,
    ) -> Option<ReportingConfig> {
        self.find(manufacturer, model)?
            .actions
            .iter()
            .rev()
            .find_map(|a| match a {
                QuirkAction::OverrideReporting { target, reporting } if *target == cap => {
                    Some(*reporting)
                }
                _ => None,
            })
    }

    fn apply(
        &self,
        direction: Direction,
        manufacturer: &str,
        model: &str,
        cap: CapabilityId,
        value: CapValue,
    ) -> QuirkResult {
        let Some(entry) = self.find(manufacturer, model) else {
            return QuirkResult::unchanged(cap, value);
        };

        let mut result = QuirkResult::unchanged(cap, value);
        result.matched = true;

        for action in entry.actions.iter().filter(|a| a.target() == cap) {
            let applied = match action {
                QuirkAction::ClampRange { min, max, .. } => {
                    clamp(&mut result.value, *min, *max)
                }
                QuirkAction::InvertBoolean { enabled, .. } => match result.value {
                    CapValue::Bool(b) if *enabled => {
                        result.value = CapValue::Bool(!b);
                        true
                    }
                    _ => false,
                },
                QuirkAction::ScaleNumeric {
                    multiplier, offset, ..
                } => scale(&mut result.value, cap.kind(), *multiplier, *offset),
                QuirkAction::RemapAttribute { to, .. } => {
                    result.target = *to;
                    true
                }
                QuirkAction::OverrideReporting { reporting, .. } => {
                    result.reporting = Some(*reporting);
                    true
                }
                QuirkAction::IgnoreSpurious { .. } => {
                    if direction == Direction::Inbound {
                        result.ignored = true;
                        true
                    } else {
                        false
                    }
                }
            };
            if applied {
                result.actions_applied += 1;
            }
        }

        if result.actions_applied > 0 {
            tracing::debug!(
                manufacturer,
                model,
                capability = %cap,
                actions = result.actions_applied,
                "Quirks applied: {} -> {}",
                value,
                result.value
            );
        }
        result
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[QuirkEntry] {
        &self.entries
    }
}

impl Default for QuirksEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp(value: &mut CapValue, min: i32, max: i32) -> bool {
    match *value {
        CapValue::Int(v) => {
            *value = CapValue::Int(v.clamp(i64::from(min), i64::from(max)));
            true
        }
        CapValue::Float(v) => {
            *value = CapValue::Float(v.clamp(f64::from(min), f64::from(max)));
            true
        }
        CapValue::Bool(_) => false,
    }
}

fn scale(value: &mut CapValue, kind: ValueKind, multiplier: f64, offset: f64) -> bool {
    let Some(v) = value.as_f64() else {
        return false;
    };
    let scaled = v * multiplier + offset;
    *value = match kind {
        // f64::round rounds half away from zero
        ValueKind::Integer => CapValue::Int(scaled.round() as i64),
        _ => CapValue::Float(scaled),
    };
    true
}
