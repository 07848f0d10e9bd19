//! Scenario S4, invariant 8 (TCP reassembly across arbitrary chunk
//! boundaries), and invariant 9 (reconnection bound) from the
//! testable-properties section, driven over a real loopback TCP socket.

use std::io::Write;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use telemetry_core::signal::null_sink;
use telemetry_core::source::tcp::{ConnectionState, TcpSource, TcpSourceConfig};
use telemetry_core::source::PacketSource;
use telemetry_core::{PacketFactory, PoolManager};

fn factory() -> Arc<PacketFactory> {
    let pools = Arc::new(PoolManager::with_standard_classes(null_sink(), 16).unwrap());
    Arc::new(PacketFactory::new(pools, Default::default()))
}

/// S4 — a valid 76-byte packet fed in chunks `[5, 15, 25, 31]` with gaps
/// between them is reassembled into exactly one delivered packet with the
/// original payload.
#[test]
fn scenario_s4_tcp_chunked_reassembly() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let factory = factory();
    let packet = factory.create(9, Some(&[7u8; 52]), 52).unwrap();
    let raw = packet.as_bytes().to_vec();
    assert_eq!(raw.len(), 76);

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let chunk_sizes = [5usize, 15, 25, 31];
        let mut offset = 0;
        for size in chunk_sizes {
            stream.write_all(&raw[offset..offset + size]).unwrap();
            offset += size;
            thread::sleep(Duration::from_millis(10));
        }
        // Keep the connection open briefly so the source has time to read.
        thread::sleep(Duration::from_millis(200));
    });

    let config = TcpSourceConfig::new("chunked", addr.ip().to_string(), addr.port());
    let source = TcpSource::new(config, factory, null_sink());

    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        source.handle().set_packet_callback(move |p| received.lock().unwrap().push(p.payload().to_vec()));
    }

    source.start().unwrap();
    thread::sleep(Duration::from_millis(500));
    source.stop().unwrap();
    server.join().unwrap();

    let delivered = received.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0], vec![7u8; 52]);
}

/// Invariant 9 — a source with `max_reconnect_attempts = k` against an
/// address nothing listens on attempts at most `k` reconnections, then
/// transitions to `Failed`.
#[test]
fn invariant_reconnection_bound_reaches_failed_state() {
    let factory = factory();
    let mut config = TcpSourceConfig::new("unreachable", "127.0.0.1", 1);
    config.max_reconnect_attempts = 2;
    config.reconnect_interval_ms = 10;
    config.connection_timeout_ms = 50;
    let source = TcpSource::new(config, factory, null_sink());

    source.start().unwrap();
    // Give the worker time to exhaust its reconnect attempts against a port
    // nothing is bound to.
    thread::sleep(Duration::from_millis(500));
    source.stop().unwrap();

    assert_eq!(source.connection_state(), ConnectionState::Failed);
}
