//! Scenario S5 from the testable-properties section, driven over real wall
//! time through the public source lifecycle.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use telemetry_core::signal::null_sink;
use telemetry_core::source::simulation::{PacketTypeConfig, PatternType, SimulationConfig, SimulationSource};
use telemetry_core::source::{PacketSource, SourceConfig};
use telemetry_core::{PacketFactory, PoolManager};

fn factory() -> Arc<PacketFactory> {
    let pools = Arc::new(PoolManager::with_standard_classes(null_sink(), 16).unwrap());
    Arc::new(PacketFactory::new(pools, Default::default()))
}

/// S5 — `{id=1001, size=64, interval_ms=50, pattern=Counter}` over 500ms
/// wall time yields between 8 and 12 packets, whose payloads read back as a
/// little-endian u32 and strictly increase starting from the first packet
/// generated (0, 1, 2, 3, ...).
#[test]
fn scenario_s5_simulation_counter_pattern() {
    let config = SimulationConfig {
        base: SourceConfig::new("s5"),
        packet_types: vec![PacketTypeConfig::new(1001, "counter", 64, 50, PatternType::Counter)],
        total_duration_ms: 0,
        burst_size: 1,
        burst_interval_ms: 0,
        randomize_timings: false,
        timing_jitter_ms: 0,
    };
    let source = SimulationSource::new(config, factory(), null_sink());

    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        source.handle().set_packet_callback(move |p| received.lock().unwrap().push(p.payload().to_vec()));
    }

    source.start().unwrap();
    thread::sleep(Duration::from_millis(500));
    source.stop().unwrap();

    let packets = received.lock().unwrap();
    assert!(packets.len() >= 8 && packets.len() <= 12, "got {} packets", packets.len());

    for (i, payload) in packets.iter().take(4).enumerate() {
        let n = u32::from_le_bytes(payload[..4].try_into().unwrap());
        assert_eq!(n, i as u32);
    }
}
