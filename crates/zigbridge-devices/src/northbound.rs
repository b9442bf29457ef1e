//! Northbound MQTT mapping.
//!
//! Bus events become MQTT publications and `<base>/<eui64>/set` messages
//! become capability calls. The MQTT client itself is a collaborator behind
//! [`MqttPublisher`].
//!
//! Topics:
//! - `<base>/<eui64>/availability`: `online` / `offline`, retained
//! - `<base>/<eui64>/<capability>/state`: JSON `{"value": .., "endpoint": ..}`
//! - `<base>/<eui64>/set`: inbound JSON command
//! - `<base>/bridge/state`: stack up/down, retained
//! - `<base>/bridge/devices`: device snapshot, retained

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use zigbridge_core::config::MqttConfig;
use zigbridge_core::error::{Error, Result};
use zigbridge_core::event::{BridgeEvent, EventKind};
use zigbridge_core::eventbus::SubscriptionId;
use zigbridge_core::ids::{CorrelationId, Eui64};

use crate::capability::{BatchError, CapValue, CapabilityId, CapabilityLayer, DeviceTarget};

/// One command resolved from a set payload.
enum SetCommand {
    Write(CapabilityId, CapValue),
    Toggle,
}

/// MQTT client boundary.
pub trait MqttPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()>;
}

/// A message handed to a publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Publisher that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().clone()
    }

    /// Messages published to `topic`, oldest first.
    pub fn on_topic(&self, topic: &str) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl MqttPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        self.messages.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        });
        Ok(())
    }
}

/// Inbound `set` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetPayload {
    /// `ON`, `OFF` or `TOGGLE`, case-insensitive.
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub brightness: Option<i64>,
    #[serde(default)]
    pub color_temp: Option<i64>,
    /// Endpoint override; otherwise the first endpoint hosting the cluster.
    #[serde(default)]
    pub endpoint: Option<u8>,
}

/// Retained device description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub ieee: Eui64,
    pub network_address: u16,
    pub manufacturer: String,
    pub model: String,
    pub online: bool,
    pub last_seen: i64,
    /// Last known capability values keyed by `<capability>` or
    /// `<capability>_<endpoint>` for secondary endpoints.
    pub capabilities: BTreeMap<String, CapValue>,
}

#[derive(Serialize)]
struct StatePayload {
    value: CapValue,
    endpoint: u8,
}

#[derive(Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
enum BridgeStatePayload<'a> {
    Online { pan_id: u16, channel: u8 },
    Offline { reason: &'a str },
}

struct BridgeInner {
    base_topic: String,
    retain_availability: bool,
    publisher: Arc<dyn MqttPublisher>,
    capabilities: CapabilityLayer,
}

impl BridgeInner {
    fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.base_topic, suffix)
    }

    fn send(&self, topic: &str, payload: &[u8], retain: bool) {
        if let Err(e) = self.publisher.publish(topic, payload, retain) {
            tracing::warn!(topic, "MQTT publish failed: {}", e);
        }
    }

    fn send_json<T: Serialize>(&self, topic: &str, payload: &T, retain: bool) {
        match serde_json::to_vec(payload) {
            Ok(bytes) => self.send(topic, &bytes, retain),
            Err(e) => tracing::warn!(topic, "Failed to encode payload: {}", e),
        }
    }

    fn handle_event(&self, event: &BridgeEvent) {
        match event {
            BridgeEvent::DeviceJoined { ieee, .. } => {
                let topic = self.topic(&format!("{}/availability", ieee.to_hex()));
                self.send(&topic, b"online", self.retain_availability);
            }
            BridgeEvent::DeviceLeft { ieee } => {
                let topic = self.topic(&format!("{}/availability", ieee.to_hex()));
                self.send(&topic, b"offline", self.retain_availability);
            }
            BridgeEvent::AttributeChanged {
                ieee,
                endpoint,
                cluster,
                attribute,
                ..
            } => {
                let Some(cap) = CapabilityId::for_attribute(*cluster, *attribute) else {
                    return;
                };
                let target = DeviceTarget::new(*ieee, *endpoint);
                match self.capabilities.read(target, cap) {
                    Ok(Some(value)) => {
                        let topic = self.topic(&format!("{}/{}/state", ieee.to_hex(), cap));
                        self.send_json(
                            &topic,
                            &StatePayload {
                                value,
                                endpoint: *endpoint,
                            },
                            false,
                        );
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(target_device = %target, "State not published: {}", e),
                }
            }
            BridgeEvent::StackUp { pan_id, channel } => {
                let topic = self.topic("bridge/state");
                self.send_json(
                    &topic,
                    &BridgeStatePayload::Online {
                        pan_id: *pan_id,
                        channel: *channel,
                    },
                    true,
                );
            }
            BridgeEvent::StackDown { reason } => {
                let topic = self.topic("bridge/state");
                self.send_json(&topic, &BridgeStatePayload::Offline { reason }, true);
            }
            _ => {}
        }
    }
}

/// Event-driven MQTT bridge.
pub struct MqttBridge {
    inner: Arc<BridgeInner>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl MqttBridge {
    const EVENTS: [EventKind; 5] = [
        EventKind::DeviceJoined,
        EventKind::DeviceLeft,
        EventKind::AttributeChanged,
        EventKind::StackUp,
        EventKind::StackDown,
    ];

    pub fn new(
        config: &MqttConfig,
        capabilities: CapabilityLayer,
        publisher: Arc<dyn MqttPublisher>,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                base_topic: config.base_topic.trim_end_matches('/').to_string(),
                retain_availability: config.retain_availability,
                publisher,
                capabilities,
            }),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn base_topic(&self) -> &str {
        &self.inner.base_topic
    }

    /// Topic filter the MQTT client should subscribe to for commands.
    pub fn command_topic_filter(&self) -> String {
        self.inner.topic("+/set")
    }

    /// Subscribe to the event bus. Fails if already attached.
    pub fn attach(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            return Err(Error::AlreadyExists("MQTT bridge already attached".into()));
        }
        let bus = self.inner.capabilities.adapter().bus().clone();
        for kind in Self::EVENTS {
            let inner = self.inner.clone();
            match bus.subscribe(kind, move |event| inner.handle_event(event)) {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    for id in subscriptions.drain(..) {
                        bus.unsubscribe(id);
                    }
                    return Err(e);
                }
            }
        }
        tracing::info!(base_topic = %self.inner.base_topic, "MQTT bridge attached");
        Ok(())
    }

    /// Drop all bus subscriptions.
    pub fn detach(&self) {
        let bus = self.inner.capabilities.adapter().bus();
        for id in self.subscriptions.lock().drain(..) {
            bus.unsubscribe(id);
        }
    }

    /// Handle an inbound MQTT message.
    ///
    /// Every field is resolved before anything is sent. Returns the
    /// correlation ids of the commands it issued, in the order state,
    /// brightness, colour temperature. A send failing part way returns the
    /// ids already issued with the error.
    pub fn handle_message(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> std::result::Result<Vec<CorrelationId>, BatchError> {
        let ieee = self.parse_set_topic(topic)?;
        let request: SetPayload = serde_json::from_slice(payload).map_err(Error::from)?;

        let mut plan = Vec::new();
        if let Some(state) = request.state.as_deref() {
            let target = self.target_for(ieee, CapabilityId::OnOff, request.endpoint)?;
            let command = match state.to_ascii_uppercase().as_str() {
                "ON" => SetCommand::Write(CapabilityId::OnOff, CapValue::Bool(true)),
                "OFF" => SetCommand::Write(CapabilityId::OnOff, CapValue::Bool(false)),
                "TOGGLE" => SetCommand::Toggle,
                other => {
                    return Err(Error::InvalidArgument(format!("unknown state {other:?}")).into());
                }
            };
            plan.push((target, command));
        }
        if let Some(brightness) = request.brightness {
            let target = self.target_for(ieee, CapabilityId::Brightness, request.endpoint)?;
            plan.push((
                target,
                SetCommand::Write(CapabilityId::Brightness, CapValue::Int(brightness)),
            ));
        }
        if let Some(mireds) = request.color_temp {
            let target = self.target_for(ieee, CapabilityId::ColorTemp, request.endpoint)?;
            plan.push((
                target,
                SetCommand::Write(CapabilityId::ColorTemp, CapValue::Int(mireds)),
            ));
        }
        if plan.is_empty() {
            return Err(Error::InvalidArgument("set payload carries no command".into()).into());
        }

        let layer = &self.inner.capabilities;
        let mut issued = Vec::with_capacity(plan.len());
        for (target, command) in plan {
            let sent = match command {
                SetCommand::Write(cap, value) => layer.write(target, cap, value),
                SetCommand::Toggle => layer.toggle(target),
            };
            match sent {
                Ok(cid) => issued.push(cid),
                Err(source) => {
                    tracing::warn!(ieee = %ieee, issued = issued.len(), "MQTT set stopped: {}", source);
                    return Err(BatchError { issued, source });
                }
            }
        }
        tracing::debug!(ieee = %ieee, commands = issued.len(), "MQTT set handled");
        Ok(issued)
    }

    fn parse_set_topic(&self, topic: &str) -> Result<Eui64> {
        topic
            .strip_prefix(self.inner.base_topic.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.strip_suffix("/set"))
            .filter(|device| !device.contains('/'))
            .ok_or_else(|| Error::InvalidArgument(format!("not a set topic: {topic}")))?
            .parse()
    }

    fn target_for(
        &self,
        ieee: Eui64,
        cap: CapabilityId,
        endpoint: Option<u8>,
    ) -> Result<DeviceTarget> {
        if let Some(ep) = endpoint {
            return Ok(DeviceTarget::new(ieee, ep));
        }
        let model = self.inner.capabilities.adapter().model().read();
        let node = model
            .find_by_ieee(ieee)
            .ok_or_else(|| Error::NotFound(format!("device {ieee}")))?;
        let (cluster, _) = cap.binding();
        let ep = node
            .endpoint_with_cluster(cluster)
            .or_else(|| node.endpoints().next())
            .map(|ep| ep.id)
            .unwrap_or(1);
        Ok(DeviceTarget::new(ieee, ep))
    }

    /// Current state of every device, ordered by address.
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let layer = &self.inner.capabilities;
        let nodes = layer.adapter().model().read().snapshot();

        nodes
            .into_iter()
            .map(|node| {
                let mut capabilities = BTreeMap::new();
                for (index, endpoint) in node.endpoints().enumerate() {
                    for cap in CapabilityId::ALL {
                        let (cluster, _) = cap.binding();
                        if !endpoint.has_cluster(cluster) {
                            continue;
                        }
                        let target = DeviceTarget::new(node.ieee, endpoint.id);
                        if let Ok(Some(value)) = layer.read(target, cap) {
                            let key = if index == 0 {
                                cap.to_string()
                            } else {
                                format!("{}_{}", cap, endpoint.id)
                            };
                            capabilities.entry(key).or_insert(value);
                        }
                    }
                }
                DeviceSnapshot {
                    ieee: node.ieee,
                    network_address: node.network_address,
                    manufacturer: node.manufacturer,
                    model: node.model,
                    online: node.online,
                    last_seen: node.last_seen,
                    capabilities,
                }
            })
            .collect()
    }

    /// Publish the snapshot to `<base>/bridge/devices` (retained).
    pub fn publish_devices(&self) {
        let topic = self.inner.topic("bridge/devices");
        self.inner.send_json(&topic, &self.snapshot(), true);
    }
}

impl Drop for MqttBridge {
    fn drop(&mut self) {
        self.detach();
    }
}
