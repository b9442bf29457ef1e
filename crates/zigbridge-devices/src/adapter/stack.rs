//! Radio stack collaborator boundary.
//!
//! The stack owns PHY/MAC/NWK/APS. The adapter calls the send primitives
//! below; the stack reports back through the adapter's `on_*` callbacks on
//! its own execution context.

use serde::{Deserialize, Serialize};
use std::fmt;

use zigbridge_core::ids::{Eui64, NetworkAddress, SequenceNumber};

use crate::zcl::{ColorCommand, OnOffCommand};

/// Immediate refusal of a send primitive, with the stack's status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRejection {
    pub code: u16,
}

impl fmt::Display for StackRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack rejected send (status 0x{:04X})", self.code)
    }
}

/// Accepted sends return the sequence number the stack will confirm.
pub type SendResult = std::result::Result<SequenceNumber, StackRejection>;

/// Attribute reporting parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingConfig {
    pub min_interval_s: u16,
    pub max_interval_s: u16,
    pub reportable_change: u32,
}

impl ReportingConfig {
    pub const fn new(min_interval_s: u16, max_interval_s: u16, reportable_change: u32) -> Self {
        Self {
            min_interval_s,
            max_interval_s,
            reportable_change,
        }
    }
}

/// Send primitives of the radio stack.
///
/// Implementations must not invoke adapter callbacks synchronously from
/// inside a send; the adapter holds its table lock across the call.
pub trait RadioStack: Send + Sync {
    /// Begin network formation. The outcome arrives via `on_network_formed`.
    fn start_network(&self) -> std::result::Result<(), StackRejection>;

    fn permit_join(&self, seconds: u8) -> std::result::Result<(), StackRejection>;

    fn send_on_off(&self, nwk: NetworkAddress, endpoint: u8, command: OnOffCommand) -> SendResult;

    fn send_level(
        &self,
        nwk: NetworkAddress,
        endpoint: u8,
        level: u8,
        transition_ds: u16,
    ) -> SendResult;

    fn send_color(&self, nwk: NetworkAddress, endpoint: u8, command: ColorCommand) -> SendResult;

    fn read_attributes(
        &self,
        nwk: NetworkAddress,
        endpoint: u8,
        cluster: u16,
        attributes: &[u16],
    ) -> SendResult;

    fn configure_reporting(
        &self,
        nwk: NetworkAddress,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        config: ReportingConfig,
    ) -> SendResult;

    /// Bind a device cluster to the coordinator.
    fn bind(&self, nwk: NetworkAddress, ieee: Eui64, endpoint: u8, cluster: u16) -> SendResult;
}
