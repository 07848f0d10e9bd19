//! Scenario S2 and invariants 4 (round-trip) and 5 (sequence monotonicity)
//! from the testable-properties section, exercised through the factory
//! rather than the header directly.

use std::sync::Arc;

use telemetry_core::{PacketFactory, PoolManager};

fn factory() -> PacketFactory {
    let pools = Arc::new(PoolManager::with_standard_classes(telemetry_core::signal::null_sink(), 32).unwrap());
    PacketFactory::new(pools, Default::default())
}

#[test]
fn scenario_s2_header_with_reserved_bit_is_rejected() {
    let factory = factory();
    let packet = factory.create(42, Some(&[0u8; 10]), 10).unwrap();
    assert!(packet.header().validate_default().is_ok());

    let mut raw = packet.as_bytes().to_vec();
    // flags occupy the last 4 bytes of the 24-byte header.
    let reserved = 1u32 << 9;
    raw[20..24].copy_from_slice(&reserved.to_le_bytes());
    let err = factory.create_from_raw(&raw).unwrap_err();
    assert!(err.to_string().contains("reserved") || err.to_string().contains("Reserved"));
}

#[test]
fn invariant_round_trip_through_raw_bytes() {
    let factory = factory();
    let payload = b"the quick brown fox";
    let original = factory.create(7, Some(payload), payload.len() as u32).unwrap();

    let raw = original.as_bytes().to_vec();
    let parsed = factory.create_from_raw(&raw).unwrap();

    assert_eq!(original.id(), parsed.id());
    assert_eq!(original.payload(), parsed.payload());
    assert_eq!(original.sequence(), parsed.sequence());
    assert_eq!(original.flags(), parsed.flags());
}

#[test]
fn invariant_sequence_is_strictly_increasing() {
    let factory = factory();
    let mut last = None;
    for _ in 0..100 {
        let packet = factory.create(1, None, 0).unwrap();
        if let Some(prev) = last {
            assert_eq!(packet.sequence(), prev + 1);
        }
        last = Some(packet.sequence());
    }
}
