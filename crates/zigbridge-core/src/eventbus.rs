//! Event bus for the bridge.
//!
//! The bus is the only channel between the southbound adapter, the
//! capability layer and northbound publishers. Dispatch is synchronous:
//! `publish` runs every handler subscribed to the event's kind, in
//! subscription order, on the caller's thread and returns after the last
//! one finishes.
//!
//! The handler list is copied under the lock and the lock is released
//! before any handler runs, so handlers may subscribe, unsubscribe or
//! publish. Changes made during a publish only affect later publishes.
//! A panicking handler is logged and the remaining handlers still run.

use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::limits;
use crate::error::{Error, Result};
use crate::event::{BridgeEvent, EventKind};

/// Handler invoked for every published event of a subscribed kind.
pub type EventHandler = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

/// Shared event bus reference.
pub type SharedEventBus = Arc<EventBus>;

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

thread_local! {
    static PUBLISH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Restores the per-thread publish depth when a publish returns.
struct DepthGuard(usize);

impl DepthGuard {
    fn enter() -> Self {
        let depth = PUBLISH_DEPTH.with(|d| d.get());
        PUBLISH_DEPTH.with(|d| d.set(depth + 1));
        Self(depth)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        PUBLISH_DEPTH.with(|d| d.set(self.0));
    }
}

/// Synchronous publish/subscribe dispatcher.
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
    max_handlers: usize,
    max_depth: usize,
    name: String,
}

impl EventBus {
    /// Create a new event bus with the default per-kind handler cap.
    pub fn new() -> Self {
        Self::with_limits(limits::MAX_HANDLERS_PER_EVENT, limits::MAX_PUBLISH_DEPTH)
    }

    /// Create a new event bus with explicit limits.
    pub fn with_limits(max_handlers: usize, max_depth: usize) -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_handlers,
            max_depth,
            name: "default".to_string(),
        }
    }

    /// Create a new event bus with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::new()
        }
    }

    /// Get the name of this event bus.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a handler for one event kind.
    ///
    /// Fails with [`Error::ResourceExhausted`] once the kind already has
    /// the maximum number of handlers.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.lock();
        let list = handlers.entry(kind).or_default();
        if list.len() >= self.max_handlers {
            tracing::error!(bus = %self.name, kind = %kind, "Max handlers reached");
            return Err(Error::ResourceExhausted(format!(
                "event handlers for {kind} (max {})",
                self.max_handlers
            )));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        list.push((id, Arc::new(handler)));
        tracing::debug!(bus = %self.name, kind = %kind, "Subscribed to event");
        Ok(id)
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Number of handlers currently subscribed to a kind.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver an event to every handler subscribed to its kind.
    ///
    /// Returns the number of handlers that completed without panicking.
    /// Nested publishes deeper than the configured depth are refused with
    /// [`Error::ResourceExhausted`] and reach no handler.
    pub fn publish(&self, event: &BridgeEvent) -> Result<usize> {
        let kind = event.kind();
        let depth = PUBLISH_DEPTH.with(|d| d.get());
        if depth >= self.max_depth {
            tracing::warn!(bus = %self.name, kind = %kind, depth, "Publish recursion limit hit, event dropped");
            return Err(Error::ResourceExhausted(format!(
                "publish depth {depth} for {kind}"
            )));
        }

        let snapshot: Vec<(SubscriptionId, EventHandler)> = {
            let handlers = self.handlers.lock();
            handlers.get(&kind).cloned().unwrap_or_default()
        };

        let _guard = DepthGuard::enter();
        let mut delivered = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::error!(
                        bus = %self.name,
                        kind = %kind,
                        subscription = ?id,
                        "Event handler panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        Ok(delivered)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{CorrelationId, Eui64};

    fn joined() -> BridgeEvent {
        BridgeEvent::DeviceJoined {
            ieee: Eui64(0x00124B001234ABCD),
            network_address: 0x1234,
        }
    }

    #[test]
    fn test_subscribe_cap() {
        let bus = EventBus::new();
        for _ in 0..10 {
            bus.subscribe(EventKind::DeviceJoined, |_| {}).unwrap();
        }
        let err = bus.subscribe(EventKind::DeviceJoined, |_| {}).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        assert_eq!(bus.handler_count(EventKind::DeviceJoined), 10);

        // Other kinds have their own budget
        assert!(bus.subscribe(EventKind::DeviceLeft, |_| {}).is_ok());
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let order = order.clone();
            bus.subscribe(EventKind::DeviceJoined, move |_| order.lock().push(i))
                .unwrap();
        }

        let delivered = bus.publish(&joined()).unwrap();
        assert_eq!(delivered, 10);
        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_publish_only_matching_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        bus.subscribe(EventKind::CommandConfirmed, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(bus.publish(&joined()).unwrap(), 0);
        bus.publish(&BridgeEvent::CommandConfirmed {
            correlation_id: CorrelationId(1),
        })
        .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_unsubscribe_runs_once() {
        let bus = Arc::new(EventBus::new());
        let runs = Arc::new(AtomicU64::new(0));
        let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let id = {
            let bus = bus.clone();
            let runs = runs.clone();
            let own_id = own_id.clone();
            bus.clone()
                .subscribe(EventKind::DeviceJoined, move |_| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    if let Some(id) = *own_id.lock() {
                        bus.unsubscribe(id);
                    }
                })
                .unwrap()
        };
        *own_id.lock() = Some(id);

        bus.publish(&joined()).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(EventKind::DeviceJoined), 0);

        bus.publish(&joined()).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_during_publish_affects_next_publish_only() {
        let bus = Arc::new(EventBus::new());
        let late_runs = Arc::new(AtomicU64::new(0));
        let added = Arc::new(Mutex::new(false));

        {
            let bus2 = bus.clone();
            let late_runs = late_runs.clone();
            let added = added.clone();
            bus.subscribe(EventKind::DeviceJoined, move |_| {
                let mut added = added.lock();
                if !*added {
                    *added = true;
                    let late_runs = late_runs.clone();
                    bus2.subscribe(EventKind::DeviceJoined, move |_| {
                        late_runs.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
            .unwrap();
        }

        assert_eq!(bus.publish(&joined()).unwrap(), 1);
        assert_eq!(late_runs.load(Ordering::SeqCst), 0);
        assert_eq!(bus.publish(&joined()).unwrap(), 2);
        assert_eq!(late_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_fanout() {
        let bus = EventBus::new();
        let after = Arc::new(AtomicU64::new(0));
        bus.subscribe(EventKind::DeviceJoined, |_| panic!("handler failure"))
            .unwrap();
        let a = after.clone();
        bus.subscribe(EventKind::DeviceJoined, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(bus.publish(&joined()).unwrap(), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recursive_publish_is_bounded() {
        let bus = Arc::new(EventBus::with_limits(10, 3));
        let calls = Arc::new(AtomicU64::new(0));
        {
            let bus2 = bus.clone();
            let calls = calls.clone();
            bus.subscribe(EventKind::DeviceJoined, move |event| {
                calls.fetch_add(1, Ordering::SeqCst);
                let _ = bus2.publish(event);
            })
            .unwrap();
        }

        bus.publish(&joined()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Depth is restored once the outer publish returns
        bus.publish(&joined()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_unsubscribe_unknown() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventKind::StackUp, |_| {}).unwrap();
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
    }
}
