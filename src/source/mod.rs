//! The packet source interface shared by every producer (simulation, TCP,
//! future memory/file sources): a state machine, statistics, a rate
//! limiter, and a delivery callback.

pub mod simulation;
pub mod tcp;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::packet::Packet;
use crate::signal::{CoreEvent, SharedEventSink};

/// Packet source lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Pausing = 3,
    Paused = 4,
    Stopping = 5,
    Error = 6,
}

impl SourceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Stopped,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Pausing,
            4 => Self::Paused,
            5 => Self::Stopping,
            _ => Self::Error,
        }
    }
}

/// Common source configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub auto_start: bool,
    pub buffer_size: u32,
    /// Maximum packets/second; 0 means unlimited.
    pub max_packet_rate: u32,
    pub enable_statistics: bool,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), auto_start: false, buffer_size: 1000, max_packet_rate: 0, enable_statistics: true }
    }
}

/// A snapshot of source statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceStatistics {
    pub packets_generated: u64,
    pub packets_delivered: u64,
    pub packets_dropped: u64,
    pub bytes_generated: u64,
    pub error_count: u64,
    pub packet_rate: f64,
    pub byte_rate: f64,
    pub drop_rate: f64,
}

struct Counters {
    packets_generated: AtomicU64,
    packets_delivered: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_generated: AtomicU64,
    error_count: AtomicU64,
    start_time: Instant,
    last_packet_time: Mutex<Option<Instant>>,
}

impl Counters {
    fn new() -> Self {
        Self {
            packets_generated: AtomicU64::new(0),
            packets_delivered: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            bytes_generated: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            start_time: Instant::now(),
            last_packet_time: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> SourceStatistics {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let delivered = self.packets_delivered.load(Ordering::Relaxed);
        let generated = self.packets_generated.load(Ordering::Relaxed);
        let bytes = self.bytes_generated.load(Ordering::Relaxed);
        let dropped = self.packets_dropped.load(Ordering::Relaxed);
        SourceStatistics {
            packets_generated: generated,
            packets_delivered: delivered,
            packets_dropped: dropped,
            bytes_generated: bytes,
            error_count: self.error_count.load(Ordering::Relaxed),
            packet_rate: if elapsed > 0.0 { delivered as f64 / elapsed } else { 0.0 },
            byte_rate: if elapsed > 0.0 { bytes as f64 / elapsed } else { 0.0 },
            drop_rate: if generated > 0 { dropped as f64 / generated as f64 } else { 0.0 },
        }
    }
}

type PacketCallback = Box<dyn Fn(Packet) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Shared state machine, statistics, rate limiting, and delivery plumbing
/// that every concrete source embeds rather than reimplements.
pub struct SourceHandle {
    config: SourceConfig,
    state: AtomicU8,
    counters: Counters,
    sink: SharedEventSink,
    packet_callback: Mutex<Option<PacketCallback>>,
    error_callback: Mutex<Option<ErrorCallback>>,
    last_emit: Mutex<Instant>,
    emitted_in_window: AtomicU64,
}

impl SourceHandle {
    pub fn new(config: SourceConfig, sink: SharedEventSink) -> Self {
        Self {
            config,
            state: AtomicU8::new(SourceState::Stopped as u8),
            counters: Counters::new(),
            sink,
            packet_callback: Mutex::new(None),
            error_callback: Mutex::new(None),
            last_emit: Mutex::new(Instant::now()),
            emitted_in_window: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn state(&self) -> SourceState {
        SourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, new: SourceState) {
        let old = self.state();
        self.state.store(new as u8, Ordering::Release);
        self.sink.emit(CoreEvent::SourceStateChanged {
            source: self.config.name.clone(),
            old: format!("{old:?}"),
            new: format!("{new:?}"),
        });
    }

    /// `Stopped -> Starting`. Fails outside `Stopped`.
    pub fn begin_start(&self) -> Result<()> {
        self.transition(SourceState::Stopped, SourceState::Starting)
    }

    /// `Starting -> Running`.
    pub fn mark_running(&self) {
        self.set_state(SourceState::Running);
        self.sink.emit(CoreEvent::SourceStarted { source: self.config.name.clone() });
    }

    /// `Running|Paused -> Stopping`.
    pub fn begin_stop(&self) -> Result<()> {
        let current = self.state();
        if !matches!(current, SourceState::Running | SourceState::Paused | SourceState::Error) {
            return Err(crate::error::TelemetryError::config(format!(
                "cannot stop source `{}` from state {current:?}",
                self.config.name
            )));
        }
        self.set_state(SourceState::Stopping);
        Ok(())
    }

    pub fn mark_stopped(&self) {
        self.set_state(SourceState::Stopped);
        self.sink.emit(CoreEvent::SourceStopped { source: self.config.name.clone() });
    }

    /// `Running -> Pausing -> Paused`.
    pub fn pause(&self) -> Result<()> {
        self.transition(SourceState::Running, SourceState::Pausing)?;
        self.set_state(SourceState::Paused);
        self.sink.emit(CoreEvent::SourcePaused { source: self.config.name.clone() });
        Ok(())
    }

    /// `Paused -> Running`.
    pub fn resume(&self) -> Result<()> {
        self.transition(SourceState::Paused, SourceState::Running)?;
        self.sink.emit(CoreEvent::SourceResumed { source: self.config.name.clone() });
        Ok(())
    }

    pub fn mark_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.counters.error_count.fetch_add(1, Ordering::Relaxed);
        self.set_state(SourceState::Error);
        self.sink.emit(CoreEvent::SourceError { source: self.config.name.clone(), message: message.clone() });
        if let Some(cb) = self.error_callback.lock().as_ref() {
            cb(&message);
        }
    }

    fn transition(&self, expected: SourceState, next: SourceState) -> Result<()> {
        let current = self.state();
        if current != expected {
            return Err(crate::error::TelemetryError::config(format!(
                "cannot transition source `{}` to {next:?} from {current:?}, expected {expected:?}",
                self.config.name
            )));
        }
        self.set_state(next);
        Ok(())
    }

    pub fn set_packet_callback(&self, callback: impl Fn(Packet) + Send + Sync + 'static) {
        *self.packet_callback.lock() = Some(Box::new(callback));
    }

    pub fn set_error_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.error_callback.lock() = Some(Box::new(callback));
    }

    /// Whether the configured `max_packet_rate` would be exceeded if a
    /// packet were emitted right now. Uses a simple 1-second sliding window.
    pub fn should_throttle(&self) -> bool {
        if self.config.max_packet_rate == 0 {
            return false;
        }
        let mut last_emit = self.last_emit.lock();
        if last_emit.elapsed() >= Duration::from_secs(1) {
            *last_emit = Instant::now();
            self.emitted_in_window.store(0, Ordering::Relaxed);
        }
        self.emitted_in_window.load(Ordering::Relaxed) >= self.config.max_packet_rate as u64
    }

    /// Hand a generated packet to the registered callback and update stats.
    /// Returns `true` if delivered, `false` if dropped (no callback set).
    pub fn deliver(&self, packet: Packet) -> bool {
        self.counters.packets_generated.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_generated.fetch_add(packet.total_size() as u64, Ordering::Relaxed);
        *self.counters.last_packet_time.lock() = Some(Instant::now());

        let id = packet.id();
        let sequence = packet.sequence();
        let callback = self.packet_callback.lock();
        if let Some(cb) = callback.as_ref() {
            self.emitted_in_window.fetch_add(1, Ordering::Relaxed);
            self.counters.packets_delivered.fetch_add(1, Ordering::Relaxed);
            cb(packet);
            self.sink.emit(CoreEvent::PacketReady { source: self.config.name.clone(), packet_id: id, sequence });
            true
        } else {
            self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn report_error(&self, message: impl Into<String>) {
        self.mark_error(message);
    }

    pub fn statistics(&self) -> SourceStatistics {
        self.counters.snapshot()
    }
}

/// Behavior every concrete packet source implements. `SourceHandle` supplies
/// the shared plumbing; implementors delegate lifecycle calls to it and
/// generate packets however is appropriate for their medium.
pub trait PacketSource: Send + Sync {
    fn handle(&self) -> &SourceHandle;
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;

    fn pause(&self) -> Result<()> {
        self.handle().pause()
    }

    fn resume(&self) -> Result<()> {
        self.handle().resume()
    }

    fn statistics(&self) -> SourceStatistics {
        self.handle().statistics()
    }

    fn name(&self) -> &str {
        self.handle().name()
    }

    fn state(&self) -> SourceState {
        self.handle().state()
    }
}

pub type SharedPacketSource = Arc<dyn PacketSource>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::null_sink;

    #[test]
    fn lifecycle_happy_path() {
        let handle = SourceHandle::new(SourceConfig::new("t"), null_sink());
        assert_eq!(handle.state(), SourceState::Stopped);
        handle.begin_start().unwrap();
        assert_eq!(handle.state(), SourceState::Starting);
        handle.mark_running();
        assert_eq!(handle.state(), SourceState::Running);
        handle.pause().unwrap();
        assert_eq!(handle.state(), SourceState::Paused);
        handle.resume().unwrap();
        assert_eq!(handle.state(), SourceState::Running);
        handle.begin_stop().unwrap();
        handle.mark_stopped();
        assert_eq!(handle.state(), SourceState::Stopped);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let handle = SourceHandle::new(SourceConfig::new("t"), null_sink());
        assert!(handle.resume().is_err());
    }

    #[test]
    fn error_can_be_reached_from_running() {
        let handle = SourceHandle::new(SourceConfig::new("t"), null_sink());
        handle.begin_start().unwrap();
        handle.mark_running();
        handle.mark_error("boom");
        assert_eq!(handle.state(), SourceState::Error);
        handle.begin_stop().unwrap();
        handle.mark_stopped();
        assert_eq!(handle.state(), SourceState::Stopped);
    }

    #[test]
    fn throttle_limits_to_configured_rate() {
        let mut config = SourceConfig::new("t");
        config.max_packet_rate = 2;
        let handle = SourceHandle::new(config, null_sink());
        assert!(!handle.should_throttle());
        handle.emitted_in_window.store(2, Ordering::Relaxed);
        assert!(handle.should_throttle());
    }

    #[test]
    fn delivery_without_callback_counts_as_dropped() {
        use crate::packet::factory::PacketFactory;
        use crate::pool::PoolManager;
        use std::sync::Arc as StdArc;

        let handle = SourceHandle::new(SourceConfig::new("t"), null_sink());
        let pools = StdArc::new(PoolManager::with_standard_classes(null_sink(), 4).unwrap());
        let factory = PacketFactory::new(pools, Default::default());
        let packet = factory.create(1, None, 0).unwrap();
        assert!(!handle.deliver(packet));
        assert_eq!(handle.statistics().packets_dropped, 1);
    }
}
