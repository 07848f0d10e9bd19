//! The `EventSink` seam: the injected interface through which every
//! component emits the named signals listed in the external interfaces
//! section, without depending on a concrete logging, GUI, or profiling
//! backend. Analogous to how `flux::monitoring::PerformanceMonitor` is a
//! concrete, swappable collaborator rather than a compile-time dependency.

use std::sync::Arc;
use tracing::debug;

/// A single named signal, carrying whatever payload its contract specifies.
/// One variant per signal name enumerated across the source, TCP source,
/// dispatcher, subscription manager, event loop, and thread manager.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    SourceStarted { source: String },
    SourceStopped { source: String },
    SourcePaused { source: String },
    SourceResumed { source: String },
    SourceStateChanged { source: String, old: String, new: String },
    PacketReady { source: String, packet_id: u32, sequence: u32 },
    SourceError { source: String, message: String },

    Connected { source: String },
    Disconnected { source: String },
    ConnectionFailed { source: String, reason: String },
    ConnectionStateChanged { source: String, old: String, new: String },

    SourceRegistered { name: String },
    SourceUnregistered { name: String },
    PacketProcessed { packet_id: u32, sequence: u32 },
    BackPressureDetected { source: String, depth: usize },
    DispatcherStatisticsUpdated { received: u64, processed: u64, dropped: u64 },

    SubscriptionAdded { id: u64, name: String, packet_id: u32 },
    SubscriptionRemoved { id: u64, name: String, packet_id: u32 },
    AllSubscriptionsCleared,

    EventProcessed { event_type: String, processing_time_us: u64 },
    QueueOverflow { event_type: String, size: usize },
    ProcessingTimeout { event_type: String, processing_time_us: u64 },

    PoolCreated { name: String },
    PoolRemoved { name: String },
    GlobalPerformanceUpdate { msgs_per_sec: f64, avg_latency_us: f64 },
    ResourcePressure { cpu_pct: f32, mem_pct: f32 },
    EmergencyStopTriggered,

    MemoryPressure { utilization: f64 },
    ErrorOccurred { message: String },
}

/// Receives every [`CoreEvent`] emitted by the core. Implementations must be
/// cheap and non-blocking; the core calls `emit` synchronously on whichever
/// thread produced the event.
pub trait EventSink: Send + Sync {
    /// Handle one emitted event.
    fn emit(&self, event: CoreEvent);
}

/// An `EventSink` that discards every event. Used as the default when no
/// sink is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: CoreEvent) {}
}

/// An `EventSink` that logs every event through `tracing` at `debug` level.
/// Useful during development or when no richer sink is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: CoreEvent) {
        debug!(?event, "core event");
    }
}

/// Shared handle to an `EventSink`, cloned cheaply into every component that
/// needs to emit signals.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Build the default sink (discard everything) as a `SharedEventSink`.
pub fn null_sink() -> SharedEventSink {
    Arc::new(NullEventSink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<String>>);

    impl EventSink for RecordingSink {
        fn emit(&self, event: CoreEvent) {
            self.0.lock().unwrap().push(format!("{event:?}"));
        }
    }

    #[test]
    fn recording_sink_captures_events() {
        let sink = RecordingSink(Mutex::new(Vec::new()));
        sink.emit(CoreEvent::AllSubscriptionsCleared);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
