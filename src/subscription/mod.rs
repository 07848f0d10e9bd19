//! Priority-ordered fan-out of packets to named subscribers, keyed by
//! packet id.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::warn;

use crate::packet::Packet;
use crate::signal::{CoreEvent, SharedEventSink};

type Callback = Arc<dyn Fn(&Packet) -> bool + Send + Sync>;

struct Subscription {
    id: u64,
    name: String,
    packet_id: u32,
    priority: i32,
    enabled: Arc<std::sync::atomic::AtomicBool>,
    callback: Callback,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    fn snapshot(&self) -> SubscriptionEntry {
        SubscriptionEntry {
            id: self.id,
            enabled: self.enabled.clone(),
            callback: self.callback.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

/// A frozen, independently-owned view of one subscriber taken at the start
/// of `distribute`; later `unsubscribe` calls cannot make an entry already
/// in this snapshot vanish mid-iteration.
struct SubscriptionEntry {
    id: u64,
    enabled: Arc<std::sync::atomic::AtomicBool>,
    callback: Callback,
    dropped: Arc<AtomicU64>,
}

/// Snapshot of one subscription's bookkeeping, without the callback itself.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub id: u64,
    pub name: String,
    pub packet_id: u32,
    pub priority: i32,
    pub enabled: bool,
    pub dropped: u64,
}

struct State {
    by_id: HashMap<u64, Subscription>,
    /// Subscription ids for a packet id, kept sorted by descending priority.
    index: HashMap<u32, Vec<u64>>,
    next_id: u64,
}

/// Routes packets to subscriber callbacks in priority order.
///
/// The callback's return value signals `consume`: returning `true` stops
/// delivery to lower-priority subscribers for that packet.
pub struct SubscriptionManager {
    state: RwLock<State>,
    sink: SharedEventSink,
    received: AtomicU64,
    delivery_failures: AtomicU64,
    last_delivery_ns: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(sink: SharedEventSink) -> Self {
        Self {
            state: RwLock::new(State { by_id: HashMap::new(), index: HashMap::new(), next_id: 1 }),
            sink,
            received: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            last_delivery_ns: AtomicU64::new(0),
        }
    }

    /// Register a subscriber for `packet_id`. Returns the subscription id.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        packet_id: u32,
        priority: i32,
        callback: impl Fn(&Packet) -> bool + Send + Sync + 'static,
    ) -> u64 {
        let name = name.into();
        let mut state = self.state.write();
        let id = state.next_id;
        state.next_id += 1;
        state.by_id.insert(
            id,
            Subscription {
                id,
                name: name.clone(),
                packet_id,
                priority,
                enabled: Arc::new(std::sync::atomic::AtomicBool::new(true)),
                callback: Arc::new(callback),
                dropped: Arc::new(AtomicU64::new(0)),
            },
        );
        let entry = state.index.entry(packet_id).or_default();
        entry.push(id);
        entry.sort_by_key(|sub_id| std::cmp::Reverse(state.by_id[sub_id].priority));
        self.sink.emit(CoreEvent::SubscriptionAdded { id, name, packet_id });
        id
    }

    /// Remove a subscription by id. No-op if it doesn't exist.
    pub fn unsubscribe(&self, id: u64) {
        let mut state = self.state.write();
        if let Some(sub) = state.by_id.remove(&id) {
            if let Some(list) = state.index.get_mut(&sub.packet_id) {
                list.retain(|&sub_id| sub_id != id);
            }
            self.sink.emit(CoreEvent::SubscriptionRemoved { id, name: sub.name, packet_id: sub.packet_id });
        }
    }

    /// Enable or disable an existing subscription; disabled subscriptions
    /// are skipped during distribution but remain registered.
    pub fn enable(&self, id: u64, enabled: bool) {
        if let Some(sub) = self.state.read().by_id.get(&id) {
            sub.enabled.store(enabled, Ordering::Relaxed);
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.by_id.clear();
        state.index.clear();
        self.sink.emit(CoreEvent::AllSubscriptionsCleared);
    }

    /// Fan a packet out to every enabled subscriber registered for its id,
    /// in descending-priority order. Returns the number of subscribers that
    /// actually received it.
    pub fn distribute(&self, packet: &Packet) -> usize {
        self.received.fetch_add(1, Ordering::Relaxed);

        // Freeze an independently-owned view of the subscriber list before
        // invoking any callback: a concurrent unsubscribe can no longer make
        // an entry already captured here vanish mid-iteration.
        let snapshot: Vec<SubscriptionEntry> = {
            let state = self.state.read();
            state.index.get(&packet.id()).into_iter().flatten().filter_map(|id| state.by_id.get(id)).map(Subscription::snapshot).collect()
        };

        let mut delivered = 0usize;
        for entry in &snapshot {
            if !entry.enabled.load(Ordering::Relaxed) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (entry.callback)(packet))) {
                Ok(consume) => {
                    delivered += 1;
                    if consume {
                        break;
                    }
                }
                Err(_) => {
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                    self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(subscription_id = entry.id, "subscriber callback panicked, isolating");
                }
            }
        }
        self.last_delivery_ns.store(now_ns(), Ordering::Relaxed);
        delivered
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    pub fn subscriptions_for(&self, packet_id: u32) -> Vec<SubscriptionInfo> {
        let state = self.state.read();
        state
            .index
            .get(&packet_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.by_id.get(id))
            .map(|sub| SubscriptionInfo {
                id: sub.id,
                name: sub.name.clone(),
                packet_id: sub.packet_id,
                priority: sub.priority,
                enabled: sub.enabled.load(Ordering::Relaxed),
                dropped: sub.dropped.load(Ordering::Relaxed),
            })
            .collect()
    }
}

fn now_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::factory::PacketFactory;
    use crate::pool::PoolManager;
    use crate::signal::null_sink;
    use std::sync::Mutex;

    fn factory() -> PacketFactory {
        let pools = Arc::new(PoolManager::with_standard_classes(null_sink(), 8).unwrap());
        PacketFactory::new(pools, Default::default())
    }

    /// Scenario S3: priority fan-out, highest priority first, consume stops
    /// lower-priority delivery.
    #[test]
    fn scenario_s3_priority_fanout_and_consume() {
        let manager = SubscriptionManager::new(null_sink());
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        manager.subscribe("low", 1, 0, move |_p| {
            order_a.lock().unwrap().push("low");
            false
        });
        let order_b = order.clone();
        manager.subscribe("high", 1, 10, move |_p| {
            order_b.lock().unwrap().push("high");
            true // consume
        });
        let order_c = order.clone();
        manager.subscribe("mid", 1, 5, move |_p| {
            order_c.lock().unwrap().push("mid");
            false
        });

        let packet = factory().create(1, None, 0).unwrap();
        let delivered = manager.distribute(&packet);

        assert_eq!(*order.lock().unwrap(), vec!["high"]);
        assert_eq!(delivered, 1);
    }

    #[test]
    fn disabled_subscription_is_skipped() {
        let manager = SubscriptionManager::new(null_sink());
        let called = Arc::new(Mutex::new(false));
        let called2 = called.clone();
        let id = manager.subscribe("s", 1, 0, move |_p| {
            *called2.lock().unwrap() = true;
            false
        });
        manager.enable(id, false);
        let packet = factory().create(1, None, 0).unwrap();
        manager.distribute(&packet);
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn panicking_callback_is_isolated() {
        let manager = SubscriptionManager::new(null_sink());
        manager.subscribe("boom", 1, 10, |_p| panic!("boom"));
        let survived = Arc::new(Mutex::new(false));
        let survived2 = survived.clone();
        manager.subscribe("survivor", 1, 0, move |_p| {
            *survived2.lock().unwrap() = true;
            false
        });
        let packet = factory().create(1, None, 0).unwrap();
        let delivered = manager.distribute(&packet);
        assert!(*survived.lock().unwrap());
        assert_eq!(delivered, 1);
        assert_eq!(manager.delivery_failures(), 1);
    }

    #[test]
    fn unsubscribe_removes_from_index() {
        let manager = SubscriptionManager::new(null_sink());
        let id = manager.subscribe("s", 1, 0, |_p| false);
        assert_eq!(manager.active_subscriptions(), 1);
        manager.unsubscribe(id);
        assert_eq!(manager.active_subscriptions(), 0);
        let packet = factory().create(1, None, 0).unwrap();
        assert_eq!(manager.distribute(&packet), 0);
    }
}
