//! Bounded global-address → network-address cache.

use std::time::Instant;

use zigbridge_core::error::{Error, Result};
use zigbridge_core::ids::{Eui64, NetworkAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressCacheEntry {
    pub ieee: Eui64,
    pub network_address: NetworkAddress,
    pub last_seen: Instant,
}

/// Fixed-capacity address table. Overflow is rejected, never evicted.
#[derive(Debug)]
pub struct AddressCache {
    entries: Vec<AddressCacheEntry>,
    capacity: usize,
}

impl AddressCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Update an existing entry in place, or append a new one.
    ///
    /// A network address is held by at most one entry: another device still
    /// mapped to `nwk` is dropped and returned.
    pub fn insert_or_update(
        &mut self,
        ieee: Eui64,
        nwk: NetworkAddress,
    ) -> Result<Option<AddressCacheEntry>> {
        let now = Instant::now();
        let displaced = self
            .entries
            .iter()
            .position(|e| e.network_address == nwk && e.ieee != ieee)
            .map(|pos| self.entries.swap_remove(pos));
        if let Some(stale) = &displaced {
            tracing::debug!(old = %stale.ieee, new = %ieee, "NWK 0x{:04X} reassigned", nwk);
        }

        if let Some(entry) = self.entries.iter_mut().find(|e| e.ieee == ieee) {
            entry.network_address = nwk;
            entry.last_seen = now;
            return Ok(displaced);
        }
        if self.entries.len() >= self.capacity {
            tracing::warn!(ieee = %ieee, "NWK cache full, cannot add");
            return Err(Error::ResourceExhausted(format!(
                "address cache ({} entries)",
                self.capacity
            )));
        }
        self.entries.push(AddressCacheEntry {
            ieee,
            network_address: nwk,
            last_seen: now,
        });
        tracing::debug!(ieee = %ieee, "NWK cache add -> 0x{:04X}", nwk);
        Ok(displaced)
    }

    pub fn lookup(&self, ieee: Eui64) -> Option<&AddressCacheEntry> {
        self.entries.iter().find(|e| e.ieee == ieee)
    }

    pub fn lookup_by_nwk(&self, nwk: NetworkAddress) -> Option<&AddressCacheEntry> {
        self.entries.iter().find(|e| e.network_address == nwk)
    }

    /// Remove an entry, moving the last entry into its slot.
    pub fn remove(&mut self, ieee: Eui64) -> Result<AddressCacheEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.ieee == ieee)
            .ok_or_else(|| Error::NotFound(format!("address cache entry {ieee}")))?;
        tracing::debug!(ieee = %ieee, "NWK cache remove");
        Ok(self.entries.swap_remove(pos))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> &[AddressCacheEntry] {
        &self.entries
    }
}
