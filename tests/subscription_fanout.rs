//! Scenario S3 and invariant 6 (subscription fan-out) from the
//! testable-properties section.

use std::sync::{Arc, Mutex};

use telemetry_core::signal::null_sink;
use telemetry_core::{PacketFactory, PoolManager, SubscriptionManager};

fn factory() -> PacketFactory {
    let pools = Arc::new(PoolManager::with_standard_classes(null_sink(), 16).unwrap());
    PacketFactory::new(pools, Default::default())
}

/// S3 — subscribers A(priority=1), B(priority=3), C(priority=2) all for id
/// 100; the observed callback order is B, C, A.
#[test]
fn scenario_s3_priority_fanout_order() {
    let manager = SubscriptionManager::new(null_sink());
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_a = order.clone();
    manager.subscribe("A", 100, 1, move |_p| {
        order_a.lock().unwrap().push("A");
        false
    });
    let order_b = order.clone();
    manager.subscribe("B", 100, 3, move |_p| {
        order_b.lock().unwrap().push("B");
        false
    });
    let order_c = order.clone();
    manager.subscribe("C", 100, 2, move |_p| {
        order_c.lock().unwrap().push("C");
        false
    });

    let packet = factory().create(100, None, 0).unwrap();
    let delivered = manager.distribute(&packet);

    assert_eq!(*order.lock().unwrap(), vec!["B", "C", "A"]);
    assert_eq!(delivered, 3);
}

/// Invariant 6 — exactly one callback invocation per enabled subscription
/// for the packet's id, none for a different id, and none for a disabled
/// subscription.
#[test]
fn invariant_fanout_hits_every_enabled_subscriber_for_the_id_exactly_once() {
    let manager = SubscriptionManager::new(null_sink());
    let counts: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(vec![0; 3]));

    for i in 0..3 {
        let counts = counts.clone();
        manager.subscribe(format!("sub-{i}"), 5, i as i32, move |_p| {
            counts.lock().unwrap()[i] += 1;
            false
        });
    }
    let counts_disabled = counts.clone();
    let disabled_sub = manager.subscribe("disabled", 5, 0, move |_p| {
        counts_disabled.lock().unwrap()[0] += 100;
        false
    });
    manager.enable(disabled_sub, false);

    let counts_other_id = counts.clone();
    manager.subscribe("other-id", 6, 0, move |_p| {
        counts_other_id.lock().unwrap()[0] += 1000;
        false
    });

    let packet = factory().create(5, None, 0).unwrap();
    manager.distribute(&packet);

    assert_eq!(*counts.lock().unwrap(), vec![1, 1, 1]);
}
