//! Canonical device model.
//!
//! An in-memory graph of every known device. The adapter performs all
//! structural mutation; the capability layer and northbound publishers
//! only read. No networking or policy lives here.

mod node;

pub use node::{Attribute, Cluster, Endpoint, Node};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use zigbridge_core::error::{Error, Result};
use zigbridge_core::ids::{Eui64, NetworkAddress};
use zigbridge_core::value::AttributeValue;

/// Shared model reference.
pub type SharedModel = Arc<RwLock<DeviceModel>>;

/// Every known node, indexed by global and network address.
#[derive(Debug, Default)]
pub struct DeviceModel {
    nodes: HashMap<Eui64, Node>,
    by_nwk: HashMap<NetworkAddress, Eui64>,
}

impl DeviceModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedModel {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Create a node. Fails if the global address is already known.
    pub fn create_node(&mut self, ieee: Eui64, nwk: NetworkAddress) -> Result<&mut Node> {
        if self.nodes.contains_key(&ieee) {
            return Err(Error::AlreadyExists(format!("node {ieee}")));
        }
        self.index_nwk(ieee, nwk);
        Ok(self.nodes.entry(ieee).or_insert_with(|| Node::new(ieee, nwk)))
    }

    /// Create a node, or bring an existing one back online at `nwk`.
    /// Returns whether the node was created.
    pub fn upsert_node(&mut self, ieee: Eui64, nwk: NetworkAddress) -> bool {
        self.index_nwk(ieee, nwk);
        match self.nodes.get_mut(&ieee) {
            Some(node) => {
                node.network_address = nwk;
                node.online = true;
                node.touch();
                false
            }
            None => {
                self.nodes.insert(ieee, Node::new(ieee, nwk));
                true
            }
        }
    }

    fn index_nwk(&mut self, ieee: Eui64, nwk: NetworkAddress) {
        if let Some(old) = self.nodes.get(&ieee).map(|n| n.network_address) {
            if self.by_nwk.get(&old) == Some(&ieee) {
                self.by_nwk.remove(&old);
            }
        }
        // A short address reassigned to another device drops the stale mapping
        if let Some(previous) = self.by_nwk.insert(nwk, ieee) {
            if previous != ieee {
                tracing::debug!(nwk, old = %previous, new = %ieee, "Network address reassigned");
            }
        }
    }

    pub fn find_by_ieee(&self, ieee: Eui64) -> Option<&Node> {
        self.nodes.get(&ieee)
    }

    pub fn find_by_ieee_mut(&mut self, ieee: Eui64) -> Option<&mut Node> {
        self.nodes.get_mut(&ieee)
    }

    pub fn find_by_nwk(&self, nwk: NetworkAddress) -> Option<&Node> {
        self.by_nwk.get(&nwk).and_then(|ieee| self.nodes.get(ieee))
    }

    pub fn find_by_nwk_mut(&mut self, nwk: NetworkAddress) -> Option<&mut Node> {
        let ieee = *self.by_nwk.get(&nwk)?;
        self.nodes.get_mut(&ieee)
    }

    /// Delete a node and its whole subtree.
    pub fn delete_node(&mut self, ieee: Eui64) -> Result<Node> {
        let node = self
            .nodes
            .remove(&ieee)
            .ok_or_else(|| Error::NotFound(format!("node {ieee}")))?;
        if self.by_nwk.get(&node.network_address) == Some(&ieee) {
            self.by_nwk.remove(&node.network_address);
        }
        Ok(node)
    }

    /// Delete the node currently at a network address.
    pub fn delete_node_by_nwk(&mut self, nwk: NetworkAddress) -> Result<Node> {
        let ieee = *self
            .by_nwk
            .get(&nwk)
            .ok_or_else(|| Error::NotFound(format!("network address 0x{nwk:04X}")))?;
        self.delete_node(ieee)
    }

    pub fn set_online(&mut self, ieee: Eui64, online: bool) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&ieee)
            .ok_or_else(|| Error::NotFound(format!("node {ieee}")))?;
        node.online = online;
        Ok(())
    }

    /// Set an existing attribute's value. The path must exist and the value
    /// must carry the attribute's declared type.
    pub fn set_attribute(
        &mut self,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        value: AttributeValue,
    ) -> Result<()> {
        let attr = self
            .nodes
            .get_mut(&ieee)
            .and_then(|n| n.endpoint_mut(endpoint))
            .and_then(|ep| ep.cluster_mut(cluster))
            .and_then(|c| c.attribute_mut(attribute))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "{ieee}/{endpoint}/0x{cluster:04X}/0x{attribute:04X}"
                ))
            })?;
        attr.set_value(value)
    }

    pub fn get_attribute(
        &self,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
    ) -> Option<&AttributeValue> {
        self.nodes
            .get(&ieee)?
            .endpoint(endpoint)?
            .cluster(cluster)?
            .attribute(attribute)
            .map(Attribute::value)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Owned copies of every node, ordered by global address, for
    /// retained/discovery publishing.
    pub fn snapshot(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.ieee);
        nodes
    }
}
