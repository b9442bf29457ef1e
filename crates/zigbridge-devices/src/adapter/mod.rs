//! Southbound Zigbee adapter.
//!
//! The adapter owns the lifecycle state, the address cache and the
//! pending-command table. All three sit behind one mutex, so stack
//! callbacks and application calls are serialized against each other.
//! Bus events are published only after that lock is released, which lets
//! handlers call back into the adapter.
//!
//! Lock order is adapter tables, then the device model. Nothing takes them
//! in the other order.

mod address_cache;
mod pending;
mod stack;
mod state;

pub use address_cache::{AddressCache, AddressCacheEntry};
pub use pending::{PendingCommand, PendingTable, SlotId};
pub use stack::{RadioStack, ReportingConfig, SendResult, StackRejection};
pub use state::AdapterState;

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use zigbridge_core::config::AdapterConfig;
use zigbridge_core::error::{Error, Result};
use zigbridge_core::event::BridgeEvent;
use zigbridge_core::eventbus::SharedEventBus;
use zigbridge_core::ids::{CorrelationId, Eui64, NetworkAddress, SequenceNumber};
use zigbridge_core::scheduler::Poller;
use zigbridge_core::storage::KvStore;
use zigbridge_core::value::AttributeValue;

use crate::capability::CapabilityId;
use crate::model::SharedModel;
use crate::quirks::QuirksEngine;
use crate::zcl::{self, basic_attrs, ColorCommand, OnOffCommand};

/// Shared adapter reference.
pub type SharedAdapter = Arc<ZigbeeAdapter>;

/// Persistence namespace for network parameters.
pub const NETWORK_NAMESPACE: &str = "zigbee";

/// Parameters of the formed network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    pub pan_id: u16,
    pub channel: u8,
}

struct AdapterTables {
    state: AdapterState,
    cache: AddressCache,
    pending: PendingTable,
    network: Option<NetworkInfo>,
}

/// Zigbee adapter: state machine, correlation store and stack callbacks.
pub struct ZigbeeAdapter {
    tables: Mutex<AdapterTables>,
    model: SharedModel,
    bus: SharedEventBus,
    quirks: Arc<QuirksEngine>,
    stack: Arc<dyn RadioStack>,
    store: Option<Arc<dyn KvStore>>,
    next_correlation: AtomicU32,
    config: AdapterConfig,
}

impl ZigbeeAdapter {
    pub fn new(
        config: &AdapterConfig,
        bus: SharedEventBus,
        model: SharedModel,
        quirks: Arc<QuirksEngine>,
        stack: Arc<dyn RadioStack>,
    ) -> Self {
        Self {
            tables: Mutex::new(AdapterTables {
                state: AdapterState::Uninitialized,
                cache: AddressCache::new(config.max_devices),
                pending: PendingTable::new(
                    config.max_pending,
                    Duration::from_millis(config.command_timeout_ms),
                ),
                network: None,
            }),
            model,
            bus,
            quirks,
            stack,
            store: None,
            next_correlation: AtomicU32::new(1),
            config: config.clone(),
        }
    }

    /// Attach the persistence collaborator for network parameters.
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn quirks(&self) -> &Arc<QuirksEngine> {
        &self.quirks
    }

    pub fn state(&self) -> AdapterState {
        self.tables.lock().state
    }

    pub fn network(&self) -> Option<NetworkInfo> {
        self.tables.lock().network
    }

    pub fn default_transition_ds(&self) -> u16 {
        self.config.default_transition_ds
    }

    fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId(self.next_correlation.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: BridgeEvent) {
        if let Err(e) = self.bus.publish(&event) {
            tracing::warn!(kind = %event.kind(), "Event not delivered: {}", e);
        }
    }

    fn emit_all(&self, events: Vec<BridgeEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    // ========== Lifecycle ==========

    /// Uninitialized -> Initializing. A second call fails.
    pub fn init(&self) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.state != AdapterState::Uninitialized {
            return Err(Error::AlreadyExists("adapter already initialized".into()));
        }
        tracing::info!("Initializing Zigbee adapter");
        tables.state.transition(AdapterState::Initializing);
        Ok(())
    }

    /// Ask the stack to form the network.
    ///
    /// A no-op once Ready. Formation completes through
    /// [`on_network_formed`](Self::on_network_formed).
    pub fn start_coordinator(&self) -> Result<()> {
        let mut tables = self.tables.lock();
        let state = tables.state;
        match state {
            AdapterState::Uninitialized => Err(Error::NotInitialized),
            AdapterState::Ready => Ok(()),
            AdapterState::Error => Err(Error::NotReady("adapter in error state".into())),
            AdapterState::Initializing => match self.stack.start_network() {
                Ok(()) => {
                    tracing::info!("Network formation requested");
                    Ok(())
                }
                Err(rejection) => {
                    tables.state.transition(AdapterState::Error);
                    drop(tables);
                    let reason = format!("formation request refused: {rejection}");
                    tracing::error!("{}", reason);
                    self.emit(BridgeEvent::StackDown {
                        reason: reason.clone(),
                    });
                    Err(Error::StackFatal(reason))
                }
            },
        }
    }

    /// Open the network for joining. Only valid when Ready.
    pub fn set_permit_join(&self, seconds: u8) -> Result<()> {
        let tables = self.tables.lock();
        require_ready(tables.state)?;
        self.stack
            .permit_join(seconds)
            .map_err(|r| Error::ProtocolFailure { code: r.code })?;
        tracing::info!(seconds, "Permit join");
        Ok(())
    }

    /// Network parameters saved by a previous formation.
    pub fn persisted_network(&self) -> Result<Option<NetworkInfo>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let pan_id = store.get_u16(NETWORK_NAMESPACE, "pan_id")?;
        let channel = store.get_u8(NETWORK_NAMESPACE, "channel")?;
        Ok(pan_id
            .zip(channel)
            .map(|(pan_id, channel)| NetworkInfo { pan_id, channel }))
    }

    fn persist_network(&self, info: NetworkInfo) {
        let Some(store) = &self.store else {
            return;
        };
        let saved = store
            .set_u16(NETWORK_NAMESPACE, "pan_id", info.pan_id)
            .and_then(|_| store.set_u8(NETWORK_NAMESPACE, "channel", info.channel));
        if let Err(e) = saved {
            tracing::warn!("Failed to persist network parameters: {}", e);
        }
    }

    // ========== Stack callbacks ==========

    /// Formation outcome. Status 0 moves to Ready, anything else to Error.
    pub fn on_network_formed(&self, status: u16, pan_id: u16, channel: u8) -> Result<()> {
        let mut tables = self.tables.lock();
        if status == zcl::status::SUCCESS {
            if !tables.state.transition(AdapterState::Ready) {
                return Err(Error::NotReady(format!(
                    "formation reported in state {}",
                    tables.state
                )));
            }
            let info = NetworkInfo { pan_id, channel };
            tables.network = Some(info);
            drop(tables);

            tracing::info!(pan_id = format_args!("0x{:04X}", pan_id), channel, "Network formed");
            self.persist_network(info);
            self.emit(BridgeEvent::StackUp { pan_id, channel });
            Ok(())
        } else {
            if !tables.state.transition(AdapterState::Error) {
                return Err(Error::NotReady(format!(
                    "formation failure reported in state {}",
                    tables.state
                )));
            }
            drop(tables);

            let reason = format!("network formation failed (status 0x{status:02X})");
            tracing::error!("{}", reason);
            self.emit(BridgeEvent::StackDown { reason });
            Ok(())
        }
    }

    /// Irrecoverable stack failure. Moves to Error and emits `StackDown`.
    pub fn on_stack_fatal(&self, reason: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        if !tables.state.transition(AdapterState::Error) {
            return Err(Error::NotReady(format!(
                "fatal error reported in state {}",
                tables.state
            )));
        }
        drop(tables);
        tracing::error!("Stack fatal: {}", reason);
        self.emit(BridgeEvent::StackDown {
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// A device announced itself. Caches its address and adds it to the model.
    pub fn on_device_announce(&self, ieee: Eui64, nwk: NetworkAddress) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.state.is_terminal() {
            return Err(Error::NotReady("adapter in error state".into()));
        }
        let displaced = tables.cache.insert_or_update(ieee, nwk)?;
        let mut model = self.model.write();
        // The previous holder of this short address is no longer reachable
        let displaced = match displaced {
            Some(stale) if model.find_by_ieee(stale.ieee).is_some_and(|n| n.online) => {
                model.set_online(stale.ieee, false)?;
                Some(stale)
            }
            _ => None,
        };
        let created = model.upsert_node(ieee, nwk);
        drop(model);
        drop(tables);

        if let Some(stale) = displaced {
            tracing::info!(ieee = %stale.ieee, nwk = format_args!("0x{:04X}", nwk), "Network address taken over, device offline");
            self.emit(BridgeEvent::DeviceLeft { ieee: stale.ieee });
        }
        tracing::info!(ieee = %ieee, nwk = format_args!("0x{:04X}", nwk), created, "Device announced");
        self.emit(BridgeEvent::DeviceJoined {
            ieee,
            network_address: nwk,
        });
        Ok(())
    }

    /// A device left. The node stays in the model, marked offline.
    pub fn on_device_leave(&self, ieee: Eui64) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.state.is_terminal() {
            return Err(Error::NotReady("adapter in error state".into()));
        }
        let cached = tables.cache.remove(ieee).is_ok();
        let known = self.model.write().set_online(ieee, false).is_ok();
        drop(tables);

        if !cached && !known {
            tracing::debug!(ieee = %ieee, "Leave from unknown device");
            return Err(Error::NotFound(format!("device {ieee}")));
        }
        tracing::info!(ieee = %ieee, "Device left");
        self.emit(BridgeEvent::DeviceLeft { ieee });
        Ok(())
    }

    /// An attribute report arrived.
    ///
    /// The raw payload is decoded by ZCL type and stored in the model,
    /// creating the endpoint and cluster on first sight. Basic cluster
    /// manufacturer/model reports also update the node identity. Reports a
    /// quirk marks as spurious are dropped without an event.
    pub fn on_attribute_report(
        &self,
        nwk: NetworkAddress,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        type_id: u8,
        raw: &[u8],
    ) -> Result<()> {
        let value = zcl::decode_attribute(type_id, raw).inspect_err(|e| {
            tracing::warn!(
                nwk = format_args!("0x{:04X}", nwk),
                cluster = format_args!("0x{:04X}", cluster),
                attribute = format_args!("0x{:04X}", attribute),
                "Undecodable report dropped: {}",
                e
            );
        })?;

        let mut tables = self.tables.lock();
        if tables.state.is_terminal() {
            return Err(Error::NotReady("adapter in error state".into()));
        }
        let ieee = match tables.cache.lookup_by_nwk(nwk) {
            Some(entry) => entry.ieee,
            None => {
                tracing::debug!(nwk = format_args!("0x{:04X}", nwk), "Report from unknown device");
                return Err(Error::NotFound(format!("network address 0x{nwk:04X}")));
            }
        };
        tables.cache.insert_or_update(ieee, nwk)?;

        let mut model = self.model.write();
        let node = model
            .find_by_ieee_mut(ieee)
            .ok_or_else(|| Error::NotFound(format!("device {ieee}")))?;

        if let Some(cap) = CapabilityId::for_attribute(cluster, attribute) {
            if let Some(cap_value) = cap.from_attribute(&value) {
                let result = self
                    .quirks
                    .apply_value(&node.manufacturer, &node.model, cap, cap_value);
                if result.ignored {
                    tracing::debug!(ieee = %ieee, capability = %cap, "Spurious report ignored");
                    return Ok(());
                }
            }
        }

        if cluster == zcl::cluster::BASIC {
            match (attribute, &value) {
                (basic_attrs::MANUFACTURER_NAME, AttributeValue::String(s)) => {
                    node.manufacturer = s.clone();
                }
                (basic_attrs::MODEL_IDENTIFIER, AttributeValue::String(s)) => {
                    node.model = s.clone();
                }
                _ => {}
            }
        }

        node.online = true;
        node.touch();
        node.endpoint_or_insert(endpoint)
            .cluster_or_insert(cluster)
            .store(attribute, value.clone());
        drop(model);
        drop(tables);

        self.emit(BridgeEvent::AttributeChanged {
            ieee,
            endpoint,
            cluster,
            attribute,
            value,
        });
        Ok(())
    }

    /// Asynchronous outcome of an accepted send.
    pub fn on_command_status(&self, seq: SequenceNumber, status: u16) -> Result<()> {
        let mut tables = self.tables.lock();
        let Some(slot) = tables.pending.find_by_sequence(seq) else {
            tracing::warn!(seq, status, "Status for unknown sequence number");
            return Err(Error::NotFound(format!("pending sequence {seq}")));
        };
        let Some(cmd) = tables.pending.free(slot) else {
            return Err(Error::NotFound(format!("pending sequence {seq}")));
        };
        drop(tables);

        let event = if status == zcl::status::SUCCESS {
            tracing::debug!(seq, correlation_id = %cmd.correlation_id, command = cmd.command, "Command confirmed");
            BridgeEvent::CommandConfirmed {
                correlation_id: cmd.correlation_id,
            }
        } else {
            tracing::warn!(
                seq,
                correlation_id = %cmd.correlation_id,
                command = cmd.command,
                "Command failed (status 0x{:02X})",
                status
            );
            BridgeEvent::CommandFailed {
                correlation_id: cmd.correlation_id,
                error_code: status,
            }
        };
        self.emit(event);
        Ok(())
    }

    // ========== Commands ==========

    /// Allocate a slot, invoke the send primitive and bind its sequence.
    ///
    /// The table lock is held across the send so a status callback cannot
    /// observe the slot before its sequence number is bound.
    fn dispatch<F>(&self, ieee: Eui64, command: &'static str, send: F) -> Result<CorrelationId>
    where
        F: FnOnce(&dyn RadioStack, NetworkAddress) -> SendResult,
    {
        let mut tables = self.tables.lock();
        require_ready(tables.state)?;
        let nwk = tables
            .cache
            .lookup(ieee)
            .map(|e| e.network_address)
            .ok_or_else(|| Error::NotFound(format!("device {ieee}")))?;

        let correlation_id = self.next_correlation_id();
        let slot = tables.pending.alloc(correlation_id, command)?;

        let mut events = Vec::new();
        let outcome = match send(self.stack.as_ref(), nwk) {
            Ok(seq) => {
                if let Some(stale) = tables.pending.find_by_sequence(seq).filter(|s| *s != slot) {
                    // Sequence numbers wrapped onto a command that never completed
                    if let Some(old) = tables.pending.free(stale) {
                        tracing::warn!(seq, correlation_id = %old.correlation_id, "Sequence reused, reclaiming stale command");
                        events.push(BridgeEvent::CommandTimeout {
                            correlation_id: old.correlation_id,
                        });
                    }
                }
                tables.pending.bind_sequence(slot, seq)?;
                tracing::debug!(ieee = %ieee, seq, correlation_id = %correlation_id, command, "Command sent");
                Ok(correlation_id)
            }
            Err(rejection) => {
                tables.pending.free(slot);
                tracing::warn!(ieee = %ieee, correlation_id = %correlation_id, command, "{}", rejection);
                events.push(BridgeEvent::CommandFailed {
                    correlation_id,
                    error_code: rejection.code,
                });
                Err(Error::ProtocolFailure {
                    code: rejection.code,
                })
            }
        };
        drop(tables);

        self.emit_all(events);
        outcome
    }

    pub fn send_on_off(
        &self,
        ieee: Eui64,
        endpoint: u8,
        command: OnOffCommand,
    ) -> Result<CorrelationId> {
        self.dispatch(ieee, "on_off", |stack, nwk| {
            stack.send_on_off(nwk, endpoint, command)
        })
    }

    pub fn send_level(
        &self,
        ieee: Eui64,
        endpoint: u8,
        level: u8,
        transition_ds: u16,
    ) -> Result<CorrelationId> {
        self.dispatch(ieee, "level", |stack, nwk| {
            stack.send_level(nwk, endpoint, level, transition_ds)
        })
    }

    pub fn send_color(
        &self,
        ieee: Eui64,
        endpoint: u8,
        command: ColorCommand,
    ) -> Result<CorrelationId> {
        self.dispatch(ieee, "color", |stack, nwk| {
            stack.send_color(nwk, endpoint, command)
        })
    }

    pub fn read_attributes(
        &self,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attributes: &[u16],
    ) -> Result<CorrelationId> {
        if attributes.is_empty() {
            return Err(Error::InvalidArgument("no attributes to read".into()));
        }
        self.dispatch(ieee, "read_attributes", |stack, nwk| {
            stack.read_attributes(nwk, endpoint, cluster, attributes)
        })
    }

    pub fn configure_reporting(
        &self,
        ieee: Eui64,
        endpoint: u8,
        cluster: u16,
        attribute: u16,
        config: ReportingConfig,
    ) -> Result<CorrelationId> {
        if config.min_interval_s > config.max_interval_s {
            return Err(Error::InvalidArgument(format!(
                "reporting interval {}s > {}s",
                config.min_interval_s, config.max_interval_s
            )));
        }
        self.dispatch(ieee, "configure_reporting", |stack, nwk| {
            stack.configure_reporting(nwk, endpoint, cluster, attribute, config)
        })
    }

    pub fn bind(&self, ieee: Eui64, endpoint: u8, cluster: u16) -> Result<CorrelationId> {
        self.dispatch(ieee, "bind", |stack, nwk| {
            stack.bind(nwk, ieee, endpoint, cluster)
        })
    }

    // ========== Maintenance ==========

    /// Delete a device: its model subtree and its cache entry.
    pub fn remove_device(&self, ieee: Eui64) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.state.is_terminal() {
            return Err(Error::NotReady("adapter in error state".into()));
        }
        let cached = tables.cache.remove(ieee).is_ok();
        let removed = self.model.write().delete_node(ieee);
        drop(tables);

        match removed {
            Ok(node) => {
                tracing::info!(ieee = %ieee, "Device removed");
                if node.online {
                    self.emit(BridgeEvent::DeviceLeft { ieee });
                }
                Ok(())
            }
            Err(_) if cached => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reclaim pending commands older than the timeout.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub(crate) fn sweep_expired_at(&self, now: Instant) -> usize {
        let expired = self.tables.lock().pending.sweep_expired(now);
        let count = expired.len();
        for cmd in expired {
            tracing::warn!(
                correlation_id = %cmd.correlation_id,
                seq = ?cmd.sequence,
                command = cmd.command,
                "Command timed out"
            );
            self.emit(BridgeEvent::CommandTimeout {
                correlation_id: cmd.correlation_id,
            });
        }
        count
    }

    /// A poller that runs the timeout sweep.
    pub fn sweep_poller(self: &Arc<Self>) -> SweepPoller {
        SweepPoller {
            adapter: Arc::clone(self),
        }
    }

    // ========== Queries ==========

    pub fn network_address(&self, ieee: Eui64) -> Option<NetworkAddress> {
        self.tables.lock().cache.lookup(ieee).map(|e| e.network_address)
    }

    pub fn cached_devices(&self) -> usize {
        self.tables.lock().cache.len()
    }

    pub fn pending_commands(&self) -> usize {
        self.tables.lock().pending.in_use()
    }
}

fn require_ready(state: AdapterState) -> Result<()> {
    if state == AdapterState::Ready {
        Ok(())
    } else {
        Err(Error::NotReady(format!("adapter is {state}")))
    }
}

/// Runs [`ZigbeeAdapter::sweep_expired`] from the poller dispatcher.
pub struct SweepPoller {
    adapter: SharedAdapter,
}

impl Poller for SweepPoller {
    fn name(&self) -> &str {
        "command_timeout_sweep"
    }

    fn poll(&mut self) {
        self.adapter.sweep_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceModel;
    use crate::simulated::SimulatedStack;
    use zigbridge_core::event::EventKind;
    use zigbridge_core::eventbus::EventBus;
    use zigbridge_core::storage::MemoryStore;

    struct Fixture {
        adapter: SharedAdapter,
        stack: Arc<SimulatedStack>,
        events: Arc<Mutex<Vec<BridgeEvent>>>,
    }

    fn fixture(config: AdapterConfig) -> Fixture {
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let events = events.clone();
            bus.subscribe(kind, move |e| events.lock().push(e.clone()))
                .unwrap();
        }
        let stack = Arc::new(SimulatedStack::new());
        let adapter = Arc::new(ZigbeeAdapter::new(
            &config,
            bus,
            DeviceModel::shared(),
            Arc::new(QuirksEngine::new()),
            stack.clone(),
        ));
        Fixture {
            adapter,
            stack,
            events,
        }
    }

    fn ready(config: AdapterConfig) -> Fixture {
        let f = fixture(config);
        f.adapter.init().unwrap();
        f.adapter.start_coordinator().unwrap();
        f.adapter.on_network_formed(0, 0x1A62, 15).unwrap();
        f.events.lock().clear();
        f
    }

    fn kinds(f: &Fixture) -> Vec<EventKind> {
        f.events.lock().iter().map(BridgeEvent::kind).collect()
    }

    const BULB: Eui64 = Eui64(0x00124B001234ABCD);

    #[test]
    fn test_lifecycle_preconditions() {
        let f = fixture(AdapterConfig::default());
        assert!(matches!(f.adapter.start_coordinator(), Err(Error::NotInitialized)));
        assert!(matches!(f.adapter.set_permit_join(60), Err(Error::NotReady(_))));

        f.adapter.init().unwrap();
        assert!(matches!(f.adapter.init(), Err(Error::AlreadyExists(_))));
        f.adapter.start_coordinator().unwrap();
        assert_eq!(f.stack.formation_requests(), 1);
        assert_eq!(f.adapter.state(), AdapterState::Initializing);

        f.adapter.on_network_formed(0, 0x1A62, 15).unwrap();
        assert_eq!(f.adapter.state(), AdapterState::Ready);
        assert_eq!(
            f.adapter.network(),
            Some(NetworkInfo {
                pan_id: 0x1A62,
                channel: 15
            })
        );
        f.adapter.start_coordinator().unwrap();
        f.adapter.set_permit_join(60).unwrap();
        assert_eq!(kinds(&f), vec![EventKind::StackUp]);
    }

    #[test]
    fn test_formation_failure_is_terminal() {
        let f = fixture(AdapterConfig::default());
        f.adapter.init().unwrap();
        f.adapter.on_network_formed(0xC2, 0, 0).unwrap();
        assert_eq!(f.adapter.state(), AdapterState::Error);
        assert_eq!(kinds(&f), vec![EventKind::StackDown]);

        assert!(f.adapter.on_network_formed(0, 1, 11).is_err());
        assert_eq!(f.adapter.state(), AdapterState::Error);
        assert!(matches!(f.adapter.start_coordinator(), Err(Error::NotReady(_))));
    }

    #[test]
    fn test_network_parameters_persisted() {
        let store = Arc::new(MemoryStore::new());
        let f = fixture(AdapterConfig::default());
        let adapter = Arc::try_unwrap(f.adapter)
            .ok()
            .unwrap()
            .with_store(store.clone());
        adapter.init().unwrap();
        adapter.on_network_formed(0, 0x1A62, 15).unwrap();

        assert_eq!(store.get_u16(NETWORK_NAMESPACE, "pan_id").unwrap(), Some(0x1A62));
        assert_eq!(
            adapter.persisted_network().unwrap(),
            Some(NetworkInfo {
                pan_id: 0x1A62,
                channel: 15
            })
        );
    }

    #[test]
    fn test_fatal_error_from_ready() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_stack_fatal("radio reset").unwrap();
        assert_eq!(f.adapter.state(), AdapterState::Error);
        assert!(f.adapter.on_stack_fatal("again").is_err());
        assert_eq!(kinds(&f), vec![EventKind::StackDown]);
    }

    #[test]
    fn test_announce_rejected_when_cache_full() {
        let f = ready(AdapterConfig {
            max_devices: 1,
            ..AdapterConfig::default()
        });
        f.adapter.on_device_announce(Eui64(1), 0x0001).unwrap();
        let err = f.adapter.on_device_announce(Eui64(2), 0x0002).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));

        // Neither the model nor the bus saw the rejected device
        assert!(f.adapter.model().read().find_by_ieee(Eui64(2)).is_none());
        assert_eq!(kinds(&f), vec![EventKind::DeviceJoined]);
    }

    #[test]
    fn test_leave_keeps_node_offline() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.adapter.on_device_leave(BULB).unwrap();

        let model = f.adapter.model().read();
        let node = model.find_by_ieee(BULB).unwrap();
        assert!(!node.online);
        drop(model);
        assert_eq!(f.adapter.network_address(BULB), None);
        assert!(matches!(
            f.adapter.send_on_off(BULB, 1, OnOffCommand::On),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            f.adapter.on_device_leave(Eui64(99)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_reused_network_address_follows_new_device() {
        let f = ready(AdapterConfig::default());
        let old = Eui64(0xA);
        let new = Eui64(0xB);
        f.adapter.on_device_announce(old, 0x1234).unwrap();
        // The old device vanished without a leave
        f.adapter.on_device_announce(new, 0x1234).unwrap();
        assert_eq!(
            kinds(&f),
            vec![
                EventKind::DeviceJoined,
                EventKind::DeviceLeft,
                EventKind::DeviceJoined
            ]
        );
        f.events.lock().clear();

        f.adapter
            .on_attribute_report(0x1234, 1, zcl::cluster::ON_OFF, 0, zcl::data_type::BOOLEAN, &[1])
            .unwrap();
        assert!(matches!(
            f.events.lock().as_slice(),
            [BridgeEvent::AttributeChanged { ieee, .. }] if *ieee == new
        ));

        let model = f.adapter.model().read();
        assert_eq!(model.find_by_nwk(0x1234).unwrap().ieee, new);
        assert!(!model.find_by_ieee(old).unwrap().online);
        assert!(model
            .find_by_ieee(old)
            .unwrap()
            .endpoint_with_cluster(zcl::cluster::ON_OFF)
            .is_none());
        drop(model);

        assert_eq!(f.adapter.network_address(old), None);
        assert!(matches!(
            f.adapter.send_on_off(old, 1, OnOffCommand::On),
            Err(Error::NotFound(_))
        ));
        assert!(f.stack.sent().is_empty());
    }

    #[test]
    fn test_callbacks_rejected_after_stack_down() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.adapter.on_stack_fatal("radio reset").unwrap();
        f.events.lock().clear();

        assert!(matches!(
            f.adapter
                .on_attribute_report(0x1234, 1, zcl::cluster::ON_OFF, 0, zcl::data_type::BOOLEAN, &[1]),
            Err(Error::NotReady(_))
        ));
        assert!(matches!(
            f.adapter.on_device_leave(BULB),
            Err(Error::NotReady(_))
        ));

        let model = f.adapter.model().read();
        let node = model.find_by_ieee(BULB).unwrap();
        assert!(node.online);
        assert!(node.endpoint(1).is_none());
        drop(model);
        assert!(f.events.lock().is_empty());
    }

    #[test]
    fn test_remove_device_deletes_subtree() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.adapter.remove_device(BULB).unwrap();
        assert!(f.adapter.model().read().is_empty());
        assert_eq!(f.adapter.cached_devices(), 0);
        assert!(matches!(f.adapter.remove_device(BULB), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_attribute_report_creates_path() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.adapter
            .on_attribute_report(0x1234, 11, zcl::cluster::LEVEL_CONTROL, 0x0000, zcl::data_type::UINT8, &[0x80])
            .unwrap();
        f.adapter
            .on_attribute_report(
                0x1234,
                1,
                zcl::cluster::BASIC,
                basic_attrs::MANUFACTURER_NAME,
                zcl::data_type::CHAR_STRING,
                &[4, b'A', b'c', b'm', b'e'],
            )
            .unwrap();

        let model = f.adapter.model().read();
        assert_eq!(
            model.get_attribute(BULB, 11, zcl::cluster::LEVEL_CONTROL, 0),
            Some(&AttributeValue::U8(0x80))
        );
        assert_eq!(model.find_by_ieee(BULB).unwrap().manufacturer, "Acme");
        drop(model);

        let events = f.events.lock();
        assert!(matches!(
            events[1],
            BridgeEvent::AttributeChanged {
                endpoint: 11,
                value: AttributeValue::U8(0x80),
                ..
            }
        ));
    }

    #[test]
    fn test_bad_reports_dropped() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.events.lock().clear();

        assert!(matches!(
            f.adapter.on_attribute_report(0x1234, 1, 0x0006, 0, zcl::data_type::UINT16, &[1]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            f.adapter.on_attribute_report(0x9999, 1, 0x0006, 0, zcl::data_type::BOOLEAN, &[1]),
            Err(Error::NotFound(_))
        ));
        assert!(f.events.lock().is_empty());
    }

    #[test]
    fn test_commands_require_ready() {
        let f = fixture(AdapterConfig::default());
        f.adapter.init().unwrap();
        assert!(matches!(
            f.adapter.send_on_off(BULB, 1, OnOffCommand::On),
            Err(Error::NotReady(_))
        ));
        assert_eq!(f.stack.sent().len(), 0);
    }

    #[test]
    fn test_command_failure_status() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.events.lock().clear();

        let cid = f.adapter.send_level(BULB, 1, 100, 0).unwrap();
        let seq = f.stack.last_sequence().unwrap();
        f.adapter.on_command_status(seq, 0x86).unwrap();

        assert_eq!(
            *f.events.lock(),
            vec![BridgeEvent::CommandFailed {
                correlation_id: cid,
                error_code: 0x86
            }]
        );
        assert_eq!(f.adapter.pending_commands(), 0);
        assert!(matches!(
            f.adapter.on_command_status(seq, 0),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_immediate_rejection_frees_slot() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.events.lock().clear();

        f.stack.reject_next(0x01);
        let err = f.adapter.send_on_off(BULB, 1, OnOffCommand::On).unwrap_err();
        assert_eq!(err, Error::ProtocolFailure { code: 0x01 });
        assert_eq!(f.adapter.pending_commands(), 0);
        assert_eq!(kinds(&f), vec![EventKind::CommandFailed]);
    }

    #[test]
    fn test_pending_exhaustion_fails_closed() {
        let f = ready(AdapterConfig {
            max_pending: 2,
            ..AdapterConfig::default()
        });
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.adapter.send_on_off(BULB, 1, OnOffCommand::On).unwrap();
        f.adapter.send_on_off(BULB, 1, OnOffCommand::Off).unwrap();
        assert!(matches!(
            f.adapter.send_on_off(BULB, 1, OnOffCommand::Toggle),
            Err(Error::ResourceExhausted(_))
        ));
        // The refused command never reached the stack
        assert_eq!(f.stack.sent().len(), 2);
    }

    #[test]
    fn test_sweep_emits_timeouts() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.events.lock().clear();

        let cid = f.adapter.send_on_off(BULB, 1, OnOffCommand::On).unwrap();
        assert_eq!(f.adapter.sweep_expired(), 0);

        let later = Instant::now() + Duration::from_millis(5000);
        assert_eq!(f.adapter.sweep_expired_at(later), 1);
        assert_eq!(
            *f.events.lock(),
            vec![BridgeEvent::CommandTimeout { correlation_id: cid }]
        );
        assert_eq!(f.adapter.pending_commands(), 0);
    }

    #[test]
    fn test_sequence_wrap_reclaims_stale_slot() {
        let f = ready(AdapterConfig::default());
        f.adapter.on_device_announce(BULB, 0x1234).unwrap();
        f.events.lock().clear();

        f.stack.set_next_sequence(42);
        let first = f.adapter.send_on_off(BULB, 1, OnOffCommand::On).unwrap();
        f.stack.set_next_sequence(42);
        let second = f.adapter.send_on_off(BULB, 1, OnOffCommand::Off).unwrap();

        assert_eq!(
            *f.events.lock(),
            vec![BridgeEvent::CommandTimeout {
                correlation_id: first
            }]
        );
        assert_eq!(f.adapter.pending_commands(), 1);
        f.adapter.on_command_status(42, 0).unwrap();
        assert_eq!(
            f.events.lock().last(),
            Some(&BridgeEvent::CommandConfirmed {
                correlation_id: second
            })
        );
    }
}
