//! Node → Endpoint → Cluster → Attribute tree.
//!
//! Each level owns its children in an id-keyed map, so removing a node
//! releases its whole subtree and ids are unique per parent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use zigbridge_core::error::{Error, Result};
use zigbridge_core::ids::{Eui64, NetworkAddress};
use zigbridge_core::value::{AttributeType, AttributeValue};

/// A single typed data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: u16,
    value: AttributeValue,
    pub reportable: bool,
}

impl Attribute {
    pub fn new(id: u16, value: AttributeValue, reportable: bool) -> Self {
        Self {
            id,
            value,
            reportable,
        }
    }

    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    pub fn attr_type(&self) -> AttributeType {
        self.value.attr_type()
    }

    /// Replace the value. The new value must carry the declared type.
    pub fn set_value(&mut self, value: AttributeValue) -> Result<()> {
        if value.attr_type() != self.value.attr_type() {
            return Err(Error::InvalidArgument(format!(
                "attribute 0x{:04X} is {:?}, got {:?}",
                self.id,
                self.value.attr_type(),
                value.attr_type()
            )));
        }
        self.value = value;
        Ok(())
    }
}

/// A group of related attributes within an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: u16,
    /// Server (true) or client role.
    pub is_server: bool,
    attributes: BTreeMap<u16, Attribute>,
}

impl Cluster {
    pub fn new(id: u16, is_server: bool) -> Self {
        Self {
            id,
            is_server,
            attributes: BTreeMap::new(),
        }
    }

    /// Declare an attribute with the zero value of its type.
    pub fn add_attribute(
        &mut self,
        id: u16,
        attr_type: AttributeType,
        reportable: bool,
    ) -> Result<&mut Attribute> {
        if self.attributes.contains_key(&id) {
            return Err(Error::AlreadyExists(format!(
                "attribute 0x{id:04X} in cluster 0x{:04X}",
                self.id
            )));
        }
        Ok(self.attributes.entry(id).or_insert(Attribute::new(
            id,
            AttributeValue::default_for(attr_type),
            reportable,
        )))
    }

    pub fn attribute(&self, id: u16) -> Option<&Attribute> {
        self.attributes.get(&id)
    }

    pub fn attribute_mut(&mut self, id: u16) -> Option<&mut Attribute> {
        self.attributes.get_mut(&id)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    /// Store a reported value, creating the attribute or retyping it if the
    /// device changed the reported type. Returns whether the value changed.
    pub fn store(&mut self, id: u16, value: AttributeValue) -> bool {
        match self.attributes.get_mut(&id) {
            Some(attr) if attr.value == value => false,
            Some(attr) => {
                if attr.attr_type() != value.attr_type() {
                    tracing::warn!(
                        cluster = self.id,
                        attribute = id,
                        "Attribute type changed from {:?} to {:?}",
                        attr.attr_type(),
                        value.attr_type()
                    );
                }
                attr.value = value;
                true
            }
            None => {
                self.attributes.insert(id, Attribute::new(id, value, true));
                true
            }
        }
    }
}

/// A logical sub-device within a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: u8,
    pub profile_id: u16,
    pub device_id: u16,
    clusters: BTreeMap<u16, Cluster>,
}

impl Endpoint {
    pub fn new(id: u8, profile_id: u16, device_id: u16) -> Self {
        Self {
            id,
            profile_id,
            device_id,
            clusters: BTreeMap::new(),
        }
    }

    pub fn add_cluster(&mut self, id: u16, is_server: bool) -> Result<&mut Cluster> {
        if self.clusters.contains_key(&id) {
            return Err(Error::AlreadyExists(format!(
                "cluster 0x{id:04X} on endpoint {}",
                self.id
            )));
        }
        Ok(self.clusters.entry(id).or_insert(Cluster::new(id, is_server)))
    }

    pub fn cluster(&self, id: u16) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    pub fn cluster_mut(&mut self, id: u16) -> Option<&mut Cluster> {
        self.clusters.get_mut(&id)
    }

    /// Existing cluster, or a new server cluster.
    pub fn cluster_or_insert(&mut self, id: u16) -> &mut Cluster {
        self.clusters.entry(id).or_insert_with(|| Cluster::new(id, true))
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    pub fn has_cluster(&self, id: u16) -> bool {
        self.clusters.contains_key(&id)
    }
}

/// A physical device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub ieee: Eui64,
    pub network_address: NetworkAddress,
    pub manufacturer: String,
    pub model: String,
    pub online: bool,
    /// Unix timestamp of the last announce or report.
    pub last_seen: i64,
    endpoints: BTreeMap<u8, Endpoint>,
}

impl Node {
    pub fn new(ieee: Eui64, network_address: NetworkAddress) -> Self {
        Self {
            ieee,
            network_address,
            manufacturer: String::new(),
            model: String::new(),
            online: true,
            last_seen: chrono::Utc::now().timestamp(),
            endpoints: BTreeMap::new(),
        }
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> Result<&mut Endpoint> {
        let id = endpoint.id;
        if self.endpoints.contains_key(&id) {
            return Err(Error::AlreadyExists(format!(
                "endpoint {id} on {}",
                self.ieee
            )));
        }
        Ok(self.endpoints.entry(id).or_insert(endpoint))
    }

    pub fn endpoint(&self, id: u8) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    pub fn endpoint_mut(&mut self, id: u8) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&id)
    }

    /// Existing endpoint, or a new HA endpoint with an unknown device type.
    pub fn endpoint_or_insert(&mut self, id: u8) -> &mut Endpoint {
        self.endpoints
            .entry(id)
            .or_insert_with(|| Endpoint::new(id, crate::zcl::PROFILE_HA, 0))
    }

    pub fn remove_endpoint(&mut self, id: u8) -> Option<Endpoint> {
        self.endpoints.remove(&id)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// First endpoint hosting `cluster`, in endpoint id order.
    pub fn endpoint_with_cluster(&self, cluster: u16) -> Option<&Endpoint> {
        self.endpoints.values().find(|ep| ep.has_cluster(cluster))
    }

    pub fn touch(&mut self) {
        self.last_seen = chrono::Utc::now().timestamp();
    }
}
