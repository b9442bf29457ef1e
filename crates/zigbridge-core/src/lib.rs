//! Core types for zigbridge.
//!
//! This crate defines the vocabulary shared by the adapter, the capability
//! layer and northbound publishers: identifiers, tagged attribute values,
//! bus events, the event bus itself, configuration and the persistence
//! interface.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod ids;
pub mod scheduler;
pub mod storage;
pub mod value;

pub use error::{Error, Result};
pub use event::{BridgeEvent, EventKind};
pub use eventbus::{EventBus, EventHandler, SharedEventBus, SubscriptionId};
pub use ids::{CorrelationId, Eui64, NetworkAddress, SequenceNumber};
pub use value::{AttributeType, AttributeValue};

/// Re-exports commonly used types.
pub mod prelude {
    // Configuration
    pub use crate::config::{BridgeConfig, defaults, env_vars, limits};

    // Error handling
    pub use crate::error::{Error, Result};

    // Identifiers and values
    pub use crate::ids::{CorrelationId, Eui64, NetworkAddress, SequenceNumber};
    pub use crate::value::{AttributeType, AttributeValue};

    // Event types
    pub use crate::event::{BridgeEvent, EventKind};

    // Event bus
    pub use crate::eventbus::{EventBus, SharedEventBus};

    // Storage
    pub use crate::storage::{KvStore, MemoryStore, StoredValue};

    // Scheduling
    pub use crate::scheduler::{Poller, Scheduler};
}
