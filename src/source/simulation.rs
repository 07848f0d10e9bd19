//! A synthetic packet source for testing and demonstration: per-type timers
//! fire at a configurable rate and fill the payload with one of several
//! waveform patterns.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::Result;
use crate::packet::header::flags::{SIMULATION, TEST_DATA};
use crate::packet::PacketFactory;
use crate::source::{PacketSource, SourceConfig, SourceHandle};

/// Waveform used to fill a simulated packet's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    Constant,
    Linear,
    Sine,
    Cosine,
    Square,
    Sawtooth,
    Random,
    Counter,
    Bitfield,
}

/// One simulated packet type: shape, rate, and pattern parameters.
#[derive(Debug, Clone)]
pub struct PacketTypeConfig {
    pub id: u32,
    pub name: String,
    pub payload_size: u32,
    pub interval_ms: u32,
    pub pattern: PatternType,
    pub amplitude: f64,
    pub frequency: f64,
    pub offset: f64,
    pub enabled: bool,
}

impl PacketTypeConfig {
    pub fn new(id: u32, name: impl Into<String>, payload_size: u32, interval_ms: u32, pattern: PatternType) -> Self {
        Self {
            id,
            name: name.into(),
            payload_size,
            interval_ms,
            pattern,
            amplitude: 1.0,
            frequency: 1.0,
            offset: 0.0,
            enabled: true,
        }
    }
}

/// Simulation-wide configuration layered on top of [`SourceConfig`].
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub base: SourceConfig,
    pub packet_types: Vec<PacketTypeConfig>,
    pub total_duration_ms: u32,
    pub burst_size: u32,
    pub burst_interval_ms: u32,
    pub randomize_timings: bool,
    pub timing_jitter_ms: u32,
}

/// Low rate, three representative packet types.
pub fn default_config() -> SimulationConfig {
    SimulationConfig {
        base: SourceConfig::new("simulation"),
        packet_types: vec![
            PacketTypeConfig::new(1, "heartbeat", 16, 1000, PatternType::Constant),
            PacketTypeConfig::new(2, "telemetry", 32, 200, PatternType::Sine),
            PacketTypeConfig::new(3, "counter", 8, 100, PatternType::Counter),
        ],
        total_duration_ms: 0,
        burst_size: 1,
        burst_interval_ms: 0,
        randomize_timings: false,
        timing_jitter_ms: 0,
    }
}

/// High rate with timing jitter, for load testing.
pub fn stress_test_config() -> SimulationConfig {
    SimulationConfig {
        base: SourceConfig::new("simulation-stress"),
        packet_types: vec![
            PacketTypeConfig::new(1, "fast", 64, 1, PatternType::Random),
            PacketTypeConfig::new(2, "fast-sine", 128, 2, PatternType::Sine),
        ],
        total_duration_ms: 0,
        burst_size: 4,
        burst_interval_ms: 5,
        randomize_timings: true,
        timing_jitter_ms: 1,
    }
}

struct PerTypeState {
    counter: u64,
    phase: f64,
}

/// Generates synthetic packets on a per-type timer according to
/// [`PatternType`].
pub struct SimulationSource {
    handle: Arc<SourceHandle>,
    config: Mutex<SimulationConfig>,
    factory: Arc<PacketFactory>,
    state: Mutex<HashMap<u32, PerTypeState>>,
    start: Mutex<Option<Instant>>,
    timer_threads: Mutex<Vec<JoinHandle<()>>>,
    stop_flag: Arc<AtomicBool>,
}

impl SimulationSource {
    pub fn new(config: SimulationConfig, factory: Arc<PacketFactory>, sink: crate::signal::SharedEventSink) -> Self {
        let handle = Arc::new(SourceHandle::new(config.base.clone(), sink));
        let state = config
            .packet_types
            .iter()
            .map(|pt| (pt.id, PerTypeState { counter: 0, phase: 0.0 }))
            .collect();
        Self {
            handle,
            config: Mutex::new(config),
            factory,
            state: Mutex::new(state),
            start: Mutex::new(None),
            timer_threads: Mutex::new(Vec::new()),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_packet_type(&self, packet_type: PacketTypeConfig) {
        self.state.lock().unwrap().insert(packet_type.id, PerTypeState { counter: 0, phase: 0.0 });
        self.config.lock().unwrap().packet_types.push(packet_type);
    }

    pub fn remove_packet_type(&self, id: u32) {
        self.config.lock().unwrap().packet_types.retain(|pt| pt.id != id);
        self.state.lock().unwrap().remove(&id);
    }

    pub fn enable_packet_type(&self, id: u32, enabled: bool) {
        if let Some(pt) = self.config.lock().unwrap().packet_types.iter_mut().find(|pt| pt.id == id) {
            pt.enabled = enabled;
        }
    }

    pub fn reset_simulation(&self) {
        for state in self.state.lock().unwrap().values_mut() {
            state.counter = 0;
            state.phase = 0.0;
        }
        *self.start.lock().unwrap() = Some(Instant::now());
    }

    fn generate_payload(pt: &PacketTypeConfig, n: u64, elapsed_s: f64, phase: f64) -> Vec<u8> {
        let mut payload = vec![0u8; pt.payload_size as usize];
        match pt.pattern {
            PatternType::Constant => fill_floats(&mut payload, pt.offset as f32),
            PatternType::Linear => fill_floats(&mut payload, (pt.offset + pt.amplitude * elapsed_s) as f32),
            PatternType::Sine => {
                let v = pt.offset + pt.amplitude * (2.0 * PI * pt.frequency * elapsed_s + phase).sin();
                fill_floats(&mut payload, v as f32);
            }
            PatternType::Cosine => {
                let v = pt.offset + pt.amplitude * (2.0 * PI * pt.frequency * elapsed_s + phase).cos();
                fill_floats(&mut payload, v as f32);
            }
            PatternType::Square => {
                let cycle = (pt.frequency * elapsed_s).fract();
                let v = if cycle < 0.5 { pt.offset + pt.amplitude } else { pt.offset - pt.amplitude };
                fill_floats(&mut payload, v as f32);
            }
            PatternType::Sawtooth => {
                let frac = (pt.frequency * elapsed_s).fract();
                let v = pt.offset + pt.amplitude * (frac * 2.0 - 1.0);
                fill_floats(&mut payload, v as f32);
            }
            PatternType::Random => {
                let mut rng = rand::thread_rng();
                let v = rng.gen_range((pt.offset - pt.amplitude)..=(pt.offset + pt.amplitude));
                fill_floats(&mut payload, v as f32);
            }
            PatternType::Counter => {
                let bytes = (n as u32).to_le_bytes();
                for chunk in payload.chunks_mut(4) {
                    let len = chunk.len().min(4);
                    chunk[..len].copy_from_slice(&bytes[..len]);
                }
            }
            PatternType::Bitfield => {
                let bits: u32 = 1u32 << (n % 32);
                let bytes = bits.to_le_bytes();
                for chunk in payload.chunks_mut(4) {
                    let len = chunk.len().min(4);
                    chunk[..len].copy_from_slice(&bytes[..len]);
                }
            }
        }
        payload
    }

    fn emit_one(&self, pt: &PacketTypeConfig) {
        let started = *self.start.lock().unwrap().get_or_insert_with(Instant::now);
        let elapsed_s = started.elapsed().as_secs_f64();
        let (n, phase) = {
            let mut state = self.state.lock().unwrap();
            let s = state.entry(pt.id).or_insert(PerTypeState { counter: 0, phase: 0.0 });
            let n = s.counter;
            s.counter += 1;
            (n, s.phase)
        };
        let payload = Self::generate_payload(pt, n, elapsed_s, phase);
        match self.factory.create(pt.id, Some(&payload), pt.payload_size) {
            Ok(mut packet) => {
                packet.set_flags(packet.flags() | SIMULATION | TEST_DATA);
                self.handle.deliver(packet);
            }
            Err(e) => self.handle.report_error(format!("simulation packet {} generation failed: {e}", pt.name)),
        }
    }
}

impl PacketSource for SimulationSource {
    fn handle(&self) -> &SourceHandle {
        &self.handle
    }

    fn start(&self) -> Result<()> {
        self.handle.begin_start()?;
        self.stop_flag.store(false, Ordering::SeqCst);
        *self.start.lock().unwrap() = Some(Instant::now());

        let config = self.config.lock().unwrap().clone();
        let mut threads = Vec::new();
        for pt in config.packet_types.into_iter().filter(|pt| pt.enabled) {
            let this_handle = self.handle.clone();
            let stop_flag = self.stop_flag.clone();
            let factory = self.factory.clone();
            let state = Mutex::new(PerTypeState { counter: 0, phase: 0.0 });
            let burst_size = config.burst_size.max(1);
            let jitter_ms = if config.randomize_timings { config.timing_jitter_ms } else { 0 };
            let started = Instant::now();

            let thread_handle = thread::Builder::new()
                .name(format!("sim-{}", pt.name))
                .spawn(move || {
                    while !stop_flag.load(Ordering::Relaxed) {
                        let jitter = if jitter_ms > 0 {
                            rand::thread_rng().gen_range(0..=jitter_ms)
                        } else {
                            0
                        };
                        thread::sleep(Duration::from_millis(pt.interval_ms as u64 + jitter as u64));
                        if stop_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        for _ in 0..burst_size {
                            let elapsed_s = started.elapsed().as_secs_f64();
                            let n = {
                                let mut s = state.lock().unwrap();
                                let n = s.counter;
                                s.counter += 1;
                                n
                            };
                            let payload = SimulationSource::generate_payload(&pt, n, elapsed_s, 0.0);
                            match factory.create(pt.id, Some(&payload), pt.payload_size) {
                                Ok(mut packet) => {
                                    packet.set_flags(packet.flags() | SIMULATION | TEST_DATA);
                                    this_handle.deliver(packet);
                                }
                                Err(e) => this_handle
                                    .report_error(format!("simulation packet {} generation failed: {e}", pt.name)),
                            }
                        }
                    }
                })
                .expect("failed to spawn simulation timer thread");
            threads.push(thread_handle);
        }

        if config.total_duration_ms > 0 {
            let stop_flag = self.stop_flag.clone();
            let duration = Duration::from_millis(config.total_duration_ms as u64);
            threads.push(
                thread::Builder::new()
                    .name("sim-duration".into())
                    .spawn(move || {
                        thread::sleep(duration);
                        stop_flag.store(true, Ordering::SeqCst);
                    })
                    .expect("failed to spawn simulation duration thread"),
            );
        }

        *self.timer_threads.lock().unwrap() = threads;
        self.handle.mark_running();
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.handle.begin_stop()?;
        self.stop_flag.store(true, Ordering::SeqCst);
        for t in self.timer_threads.lock().unwrap().drain(..) {
            let _ = t.join();
        }
        self.handle.mark_stopped();
        Ok(())
    }
}

fn fill_floats(payload: &mut [u8], value: f32) {
    let bytes = value.to_le_bytes();
    for chunk in payload.chunks_mut(4) {
        let len = chunk.len().min(4);
        chunk[..len].copy_from_slice(&bytes[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolManager;
    use crate::signal::null_sink;

    fn factory() -> Arc<PacketFactory> {
        let pools = Arc::new(PoolManager::with_standard_classes(null_sink(), 32).unwrap());
        Arc::new(PacketFactory::new(pools, Default::default()))
    }

    #[test]
    fn constant_pattern_fills_offset() {
        let pt = PacketTypeConfig { offset: 3.0, ..PacketTypeConfig::new(1, "c", 8, 10, PatternType::Constant) };
        let payload = SimulationSource::generate_payload(&pt, 0, 0.0, 0.0);
        assert_eq!(f32::from_le_bytes(payload[..4].try_into().unwrap()), 3.0);
    }

    /// Scenario S5: counter pattern increments once per generated packet.
    #[test]
    fn scenario_s5_counter_pattern_increments() {
        let pt = PacketTypeConfig::new(9, "counter", 4, 10, PatternType::Counter);
        let p0 = SimulationSource::generate_payload(&pt, 0, 0.0, 0.0);
        let p1 = SimulationSource::generate_payload(&pt, 1, 0.0, 0.0);
        assert_eq!(u32::from_le_bytes(p0[..4].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(p1[..4].try_into().unwrap()), 1);
    }

    #[test]
    fn bitfield_pattern_rotates_through_32_bits() {
        let pt = PacketTypeConfig::new(9, "bits", 4, 10, PatternType::Bitfield);
        let p32 = SimulationSource::generate_payload(&pt, 32, 0.0, 0.0);
        let p0 = SimulationSource::generate_payload(&pt, 0, 0.0, 0.0);
        assert_eq!(p32, p0);
    }

    #[test]
    fn emitted_packets_carry_simulation_and_test_data_flags() {
        let source = SimulationSource::new(default_config(), factory(), null_sink());
        let received = Arc::new(Mutex::new(Vec::new()));
        {
            let received = received.clone();
            source.handle().set_packet_callback(move |p| received.lock().unwrap().push(p.flags()));
        }
        let pt = &source.config.lock().unwrap().packet_types[0].clone();
        source.emit_one(pt);
        let flags = received.lock().unwrap()[0];
        assert_eq!(flags & SIMULATION, SIMULATION);
        assert_eq!(flags & TEST_DATA, TEST_DATA);
    }

    #[test]
    fn default_and_stress_configs_are_distinct() {
        assert_ne!(default_config().packet_types.len(), 0);
        assert!(stress_test_config().burst_size > 1);
    }
}
