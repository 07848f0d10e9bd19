//! The packet dispatcher: binds registered sources to the subscription
//! manager, applies backpressure on the hot path, and periodically
//! aggregates statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::constants::{DEFAULT_BACKPRESSURE_THRESHOLD, DEFAULT_MAX_SOURCES};
use crate::error::{Result, TelemetryError};
use crate::packet::Packet;
use crate::signal::{CoreEvent, SharedEventSink};
use crate::source::SharedPacketSource;
use crate::subscription::SubscriptionManager;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub enable_backpressure: bool,
    pub backpressure_threshold: u32,
    pub max_sources: u32,
    pub enable_metrics: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enable_backpressure: true,
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
            max_sources: DEFAULT_MAX_SOURCES,
            enable_metrics: true,
        }
    }
}

/// Aggregated dispatcher statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherStats {
    pub received: u64,
    pub processed: u64,
    pub dropped: u64,
    pub in_flight: i64,
    pub packet_rate: f64,
}

struct RegisteredSource {
    source: SharedPacketSource,
    enabled: bool,
}

struct State {
    sources: HashMap<String, RegisteredSource>,
    last_stats_instant: Instant,
    last_processed: u64,
}

/// Routes packets from registered sources through the subscription manager,
/// applying a drop-newest backpressure policy on the hot path.
pub struct PacketDispatcher {
    config: DispatcherConfig,
    subscriptions: Arc<SubscriptionManager>,
    sink: SharedEventSink,
    state: RwLock<State>,
    running: AtomicBool,
    received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    in_flight: AtomicI64,
}

impl PacketDispatcher {
    pub fn new(config: DispatcherConfig, subscriptions: Arc<SubscriptionManager>, sink: SharedEventSink) -> Self {
        Self {
            config,
            subscriptions,
            sink,
            state: RwLock::new(State { sources: HashMap::new(), last_stats_instant: Instant::now(), last_processed: 0 }),
            running: AtomicBool::new(false),
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            in_flight: AtomicI64::new(0),
        }
    }

    /// Idempotent.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Idempotent; in-flight work already on its way to subscribers is left
    /// to finish, no new packets are accepted once stopped.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Register a named packet source. Fails on a duplicate name or once
    /// `max_sources` is reached.
    pub fn register_source(&self, name: impl Into<String>, source: SharedPacketSource) -> Result<()> {
        let name = name.into();
        let mut state = self.state.write();
        if state.sources.contains_key(&name) {
            return Err(TelemetryError::config(format!("source `{name}` already registered")));
        }
        if state.sources.len() as u32 >= self.config.max_sources {
            return Err(TelemetryError::capacity(format!(
                "cannot register `{name}`: at max_sources limit of {}",
                self.config.max_sources
            )));
        }
        state.sources.insert(name.clone(), RegisteredSource { source, enabled: true });
        self.sink.emit(CoreEvent::SourceRegistered { name });
        Ok(())
    }

    pub fn unregister_source(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.sources.remove(name).is_none() {
            return Err(TelemetryError::config(format!("no such source `{name}`")));
        }
        self.sink.emit(CoreEvent::SourceUnregistered { name: name.to_string() });
        Ok(())
    }

    pub fn enable_source(&self, name: &str, enabled: bool) -> Result<()> {
        let mut state = self.state.write();
        let entry =
            state.sources.get_mut(name).ok_or_else(|| TelemetryError::config(format!("no such source `{name}`")))?;
        entry.enabled = enabled;
        Ok(())
    }

    /// Forward to the subscription manager.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        packet_id: u32,
        priority: i32,
        callback: impl Fn(&Packet) -> bool + Send + Sync + 'static,
    ) -> u64 {
        self.subscriptions.subscribe(name, packet_id, priority, callback)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscriptions.unsubscribe(id);
    }

    /// Hot path: called with a packet a registered source just produced.
    /// Applies backpressure, then forwards to the subscription manager.
    pub fn ingest(&self, source_name: &str, packet: &Packet) {
        self.received.fetch_add(1, Ordering::Relaxed);

        if !self.is_running() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let source_enabled = self.state.read().sources.get(source_name).map(|s| s.enabled).unwrap_or(false);
        if !source_enabled {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if self.config.enable_backpressure {
            let depth = self.in_flight.load(Ordering::Relaxed);
            if depth > self.config.backpressure_threshold as i64 {
                self.sink.emit(CoreEvent::BackPressureDetected {
                    source: source_name.to_string(),
                    depth: depth as usize,
                });
                // Drop-newest: preserve head-of-line, shed this packet.
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.distribute(packet);
        self.in_flight.fetch_sub(1, Ordering::Relaxed);

        self.processed.fetch_add(1, Ordering::Relaxed);
        self.sink.emit(CoreEvent::PacketProcessed { packet_id: packet.id(), sequence: packet.sequence() });
    }

    /// Aggregate and emit current statistics; `received = processed +
    /// dropped + in_flight` holds at any snapshot instant.
    pub fn statistics(&self) -> DispatcherStats {
        let received = self.received.load(Ordering::Relaxed);
        let processed = self.processed.load(Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);
        let in_flight = self.in_flight.load(Ordering::Relaxed);

        let mut state = self.state.write();
        let elapsed = state.last_stats_instant.elapsed().as_secs_f64();
        let packet_rate = if elapsed > 0.0 { (processed.saturating_sub(state.last_processed)) as f64 / elapsed } else { 0.0 };
        state.last_stats_instant = Instant::now();
        state.last_processed = processed;
        drop(state);

        self.sink.emit(CoreEvent::DispatcherStatisticsUpdated { received, processed, dropped });
        DispatcherStats { received, processed, dropped, in_flight, packet_rate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::factory::PacketFactory;
    use crate::pool::PoolManager;
    use crate::signal::null_sink;
    use crate::source::{PacketSource, SourceConfig, SourceHandle};

    struct StubSource(Arc<SourceHandle>);
    impl PacketSource for StubSource {
        fn handle(&self) -> &SourceHandle {
            &self.0
        }
        fn start(&self) -> Result<()> {
            Ok(())
        }
        fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    fn factory() -> PacketFactory {
        let pools = Arc::new(PoolManager::with_standard_classes(null_sink(), 16).unwrap());
        PacketFactory::new(pools, Default::default())
    }

    fn dispatcher() -> PacketDispatcher {
        let subs = Arc::new(SubscriptionManager::new(null_sink()));
        PacketDispatcher::new(DispatcherConfig::default(), subs, null_sink())
    }

    #[test]
    fn duplicate_source_registration_fails() {
        let d = dispatcher();
        let src: SharedPacketSource = Arc::new(StubSource(Arc::new(SourceHandle::new(SourceConfig::new("a"), null_sink()))));
        d.register_source("a", src.clone()).unwrap();
        assert!(d.register_source("a", src).is_err());
    }

    #[test]
    fn exceeding_max_sources_fails() {
        let mut config = DispatcherConfig::default();
        config.max_sources = 1;
        let subs = Arc::new(SubscriptionManager::new(null_sink()));
        let d = PacketDispatcher::new(config, subs, null_sink());
        let a: SharedPacketSource = Arc::new(StubSource(Arc::new(SourceHandle::new(SourceConfig::new("a"), null_sink()))));
        let b: SharedPacketSource = Arc::new(StubSource(Arc::new(SourceHandle::new(SourceConfig::new("b"), null_sink()))));
        d.register_source("a", a).unwrap();
        assert!(d.register_source("b", b).is_err());
    }

    #[test]
    fn stopped_dispatcher_drops_everything() {
        let d = dispatcher();
        let packet = factory().create(1, None, 0).unwrap();
        d.ingest("x", &packet);
        assert_eq!(d.statistics().dropped, 1);
    }

    /// Scenario S6: once in-flight depth exceeds the threshold, new packets
    /// are dropped and a back-pressure signal fires.
    #[test]
    fn scenario_s6_backpressure_drops_newest() {
        use std::sync::atomic::AtomicUsize;
        struct CountingSink(AtomicUsize);
        impl crate::signal::EventSink for CountingSink {
            fn emit(&self, event: CoreEvent) {
                if matches!(event, CoreEvent::BackPressureDetected { .. }) {
                    self.0.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let mut config = DispatcherConfig::default();
        config.backpressure_threshold = 0;
        let subs = Arc::new(SubscriptionManager::new(null_sink()));
        let d = PacketDispatcher::new(config, subs, sink.clone());
        d.register_source("x", Arc::new(StubSource(Arc::new(SourceHandle::new(SourceConfig::new("x"), null_sink()))))).unwrap();
        d.start();

        let packet = factory().create(1, None, 0).unwrap();
        d.ingest("x", &packet);
        assert!(sink.0.load(Ordering::Relaxed) >= 1);
        assert_eq!(d.statistics().dropped, 1);
    }

    #[test]
    fn received_equals_processed_plus_dropped_when_idle() {
        let d = dispatcher();
        d.register_source("x", Arc::new(StubSource(Arc::new(SourceHandle::new(SourceConfig::new("x"), null_sink()))))).unwrap();
        d.start();
        let packet = factory().create(1, None, 0).unwrap();
        d.ingest("x", &packet);
        let stats = d.statistics();
        assert_eq!(stats.received, stats.processed + stats.dropped + stats.in_flight as u64);
    }
}
