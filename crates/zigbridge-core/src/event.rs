//! Events carried by the bridge event bus.
//!
//! Components never call each other across the southbound/northbound
//! boundary directly; they publish and subscribe to these events.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{CorrelationId, Eui64, NetworkAddress};
use crate::value::AttributeValue;

/// Kind of a bus event, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    DeviceJoined,
    DeviceLeft,
    AttributeChanged,
    CommandConfirmed,
    CommandFailed,
    CommandTimeout,
    StackUp,
    StackDown,
}

impl EventKind {
    /// Every event kind, in declaration order.
    pub const ALL: [EventKind; 8] = [
        EventKind::DeviceJoined,
        EventKind::DeviceLeft,
        EventKind::AttributeChanged,
        EventKind::CommandConfirmed,
        EventKind::CommandFailed,
        EventKind::CommandTimeout,
        EventKind::StackUp,
        EventKind::StackDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceJoined => "DeviceJoined",
            Self::DeviceLeft => "DeviceLeft",
            Self::AttributeChanged => "AttributeChanged",
            Self::CommandConfirmed => "CommandConfirmed",
            Self::CommandFailed => "CommandFailed",
            Self::CommandTimeout => "CommandTimeout",
            Self::StackUp => "StackUp",
            Self::StackDown => "StackDown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bridge event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    // ========== Device Events ==========
    /// A device announced itself and was admitted to the address cache.
    DeviceJoined {
        ieee: Eui64,
        network_address: NetworkAddress,
    },

    /// A device left the network. The node is kept, marked offline.
    DeviceLeft { ieee: Eui64 },

    /// An attribute report was stored in the device model.
    AttributeChanged {
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        value: AttributeValue,
    },

    // ========== Command Events ==========
    /// The stack confirmed delivery of a command.
    CommandConfirmed { correlation_id: CorrelationId },

    /// The stack rejected or failed a command.
    CommandFailed {
        correlation_id: CorrelationId,
        error_code: u16,
    },

    /// No confirmation arrived within the command timeout.
    CommandTimeout { correlation_id: CorrelationId },

    // ========== Stack Events ==========
    /// The network formed and the adapter is ready.
    StackUp { pan_id: u16, channel: u8 },

    /// The stack failed; the adapter is in its terminal error state.
    StackDown { reason: String },
}

impl BridgeEvent {
    /// The subscription key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceJoined { .. } => EventKind::DeviceJoined,
            Self::DeviceLeft { .. } => EventKind::DeviceLeft,
            Self::AttributeChanged { .. } => EventKind::AttributeChanged,
            Self::CommandConfirmed { .. } => EventKind::CommandConfirmed,
            Self::CommandFailed { .. } => EventKind::CommandFailed,
            Self::CommandTimeout { .. } => EventKind::CommandTimeout,
            Self::StackUp { .. } => EventKind::StackUp,
            Self::StackDown { .. } => EventKind::StackDown,
        }
    }

    /// The device this event concerns, if any.
    pub fn ieee(&self) -> Option<Eui64> {
        match self {
            Self::DeviceJoined { ieee, .. }
            | Self::DeviceLeft { ieee }
            | Self::AttributeChanged { ieee, .. } => Some(*ieee),
            _ => None,
        }
    }

    /// The correlation id for command outcome events.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::CommandConfirmed { correlation_id }
            | Self::CommandFailed { correlation_id, .. }
            | Self::CommandTimeout { correlation_id } => Some(*correlation_id),
            _ => None,
        }
    }

    pub fn is_command_event(&self) -> bool {
        self.correlation_id().is_some()
    }
}
