//! Zigbee device side of zigbridge.
//!
//! ## Architecture
//!
//! - **ZigbeeAdapter**: lifecycle state machine, address cache and
//!   pending-command correlation, driven by radio stack callbacks
//! - **DeviceModel**: canonical Node → Endpoint → Cluster → Attribute tree
//! - **QuirksEngine**: per manufacturer/model value corrections
//! - **CapabilityLayer**: light/switch/sensor verbs on top of the adapter
//! - **MqttBridge**: maps bus events and `set` messages to MQTT topics
//!
//! The radio stack is a collaborator behind [`RadioStack`];
//! [`SimulatedStack`] stands in for it in tests and demos.

pub mod adapter;
pub mod capability;
pub mod model;
pub mod northbound;
pub mod quirks;
pub mod simulated;
pub mod zcl;

pub use adapter::{
    AdapterState, NetworkInfo, RadioStack, ReportingConfig, SharedAdapter, StackRejection,
    SweepPoller, ZigbeeAdapter,
};
pub use capability::{
    BatchError, CapValue, CapabilityId, CapabilityLayer, DeviceTarget, Light, Sensor, Switch,
    ValueKind,
};
pub use model::{Attribute, Cluster, DeviceModel, Endpoint, Node, SharedModel};
pub use northbound::{
    DeviceSnapshot, MqttBridge, MqttPublisher, PublishedMessage, RecordingPublisher, SetPayload,
};
pub use quirks::{ModelMatch, QuirkAction, QuirkEntry, QuirkResult, QuirksEngine, builtin_quirks};
pub use simulated::{SentFrame, SimulatedStack};
