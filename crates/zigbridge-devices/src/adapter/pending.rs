//! Pending-command correlation table.
//!
//! Each outbound command holds a slot from allocation until its status
//! arrives, it is rejected, or the timeout sweep reclaims it.

use std::time::{Duration, Instant};

use zigbridge_core::error::{Error, Result};
use zigbridge_core::ids::{CorrelationId, SequenceNumber};

/// Index of a slot in the pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub correlation_id: CorrelationId,
    /// Assigned once the stack accepts the send.
    pub sequence: Option<SequenceNumber>,
    pub created: Instant,
    /// Command name, for logs.
    pub command: &'static str,
}

/// Fixed-capacity pending table. Allocation fails closed when full.
#[derive(Debug)]
pub struct PendingTable {
    slots: Vec<Option<PendingCommand>>,
    timeout: Duration,
}

impl PendingTable {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            slots: vec![None; capacity],
            timeout,
        }
    }

    /// Reserve a free slot.
    pub fn alloc(&mut self, correlation_id: CorrelationId, command: &'static str) -> Result<SlotId> {
        self.alloc_at(correlation_id, command, Instant::now())
    }

    pub(crate) fn alloc_at(
        &mut self,
        correlation_id: CorrelationId,
        command: &'static str,
        now: Instant,
    ) -> Result<SlotId> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            tracing::warn!(correlation_id = %correlation_id, "Pending cmd slots full");
            return Err(Error::ResourceExhausted(format!(
                "pending commands ({} slots)",
                self.slots.len()
            )));
        };
        self.slots[index] = Some(PendingCommand {
            correlation_id,
            sequence: None,
            created: now,
            command,
        });
        Ok(SlotId(index))
    }

    /// Attach the protocol sequence number to an allocated slot.
    pub fn bind_sequence(&mut self, slot: SlotId, seq: SequenceNumber) -> Result<()> {
        if let Some(other) = self.find_by_sequence(seq) {
            if other != slot {
                return Err(Error::AlreadyExists(format!(
                    "sequence number {seq} already pending"
                )));
            }
        }
        let entry = self
            .slots
            .get_mut(slot.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::NotFound(format!("pending slot {}", slot.0)))?;
        entry.sequence = Some(seq);
        Ok(())
    }

    /// Slot holding `seq`, if any.
    pub fn find_by_sequence(&self, seq: SequenceNumber) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(cmd) if cmd.sequence == Some(seq)))
            .map(SlotId)
    }

    pub fn get(&self, slot: SlotId) -> Option<&PendingCommand> {
        self.slots.get(slot.0).and_then(Option::as_ref)
    }

    /// Release a slot, returning what it held.
    pub fn free(&mut self, slot: SlotId) -> Option<PendingCommand> {
        self.slots.get_mut(slot.0).and_then(Option::take)
    }

    /// Free every slot older than the timeout.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<PendingCommand> {
        let timeout = self.timeout;
        self.slots
            .iter_mut()
            .filter(|s| {
                s.as_ref()
                    .is_some_and(|cmd| now.saturating_duration_since(cmd.created) >= timeout)
            })
            .filter_map(Option::take)
            .collect()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingCommand> {
        self.slots.iter().flatten()
    }
}
