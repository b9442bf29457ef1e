//! Event bus tests across threads and event kinds.
//!
//! Tests include:
//! - Concurrent publishers
//! - Handlers publishing other kinds
//! - Subscription churn during fan-out

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use zigbridge_core::{
    BridgeEvent, CorrelationId, Eui64, EventBus, EventKind, SharedEventBus,
};

fn confirmed(id: u32) -> BridgeEvent {
    BridgeEvent::CommandConfirmed {
        correlation_id: CorrelationId(id),
    }
}

#[test]
fn test_concurrent_publishers_deliver_every_event() {
    let bus: SharedEventBus = Arc::new(EventBus::new());
    let seen = Arc::new(AtomicUsize::new(0));
    let s = seen.clone();
    bus.subscribe(EventKind::CommandConfirmed, move |_| {
        s.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    bus.publish(&confirmed(t * 1000 + i)).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(seen.load(Ordering::SeqCst), 400);
}

#[test]
fn test_handler_may_publish_other_kind() {
    let bus: SharedEventBus = Arc::new(EventBus::new());
    let downs = Arc::new(Mutex::new(Vec::new()));

    {
        let bus2 = bus.clone();
        bus.subscribe(EventKind::DeviceLeft, move |event| {
            if let Some(ieee) = event.ieee() {
                bus2.publish(&BridgeEvent::StackDown {
                    reason: format!("lost {ieee}"),
                })
                .unwrap();
            }
        })
        .unwrap();
    }
    {
        let downs = downs.clone();
        bus.subscribe(EventKind::StackDown, move |event| {
            if let BridgeEvent::StackDown { reason } = event {
                downs.lock().push(reason.clone());
            }
        })
        .unwrap();
    }

    bus.publish(&BridgeEvent::DeviceLeft {
        ieee: Eui64(0x00124B001234ABCD),
    })
    .unwrap();

    assert_eq!(*downs.lock(), vec!["lost 0x00124B001234ABCD".to_string()]);
}

#[test]
fn test_unsubscribing_later_handler_mid_publish() {
    // The in-flight publish uses its snapshot, so the second handler still runs once.
    let bus: SharedEventBus = Arc::new(EventBus::new());
    let second_runs = Arc::new(AtomicUsize::new(0));
    let second_id = Arc::new(Mutex::new(None));

    {
        let bus2 = bus.clone();
        let second_id = second_id.clone();
        bus.subscribe(EventKind::StackUp, move |_| {
            if let Some(id) = second_id.lock().take() {
                bus2.unsubscribe(id);
            }
        })
        .unwrap();
    }
    let r = second_runs.clone();
    let id = bus
        .subscribe(EventKind::StackUp, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    *second_id.lock() = Some(id);

    let up = BridgeEvent::StackUp {
        pan_id: 0x1A62,
        channel: 15,
    };
    assert_eq!(bus.publish(&up).unwrap(), 2);
    assert_eq!(bus.publish(&up).unwrap(), 1);
    assert_eq!(second_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_every_kind_has_independent_handler_budget() {
    let bus = EventBus::with_limits(2, 8);
    for kind in EventKind::ALL {
        bus.subscribe(kind, |_| {}).unwrap();
        bus.subscribe(kind, |_| {}).unwrap();
        assert!(bus.subscribe(kind, |_| {}).is_err());
    }
}
