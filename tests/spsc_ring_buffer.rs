//! Scenario S1 and the SPSC/no-loss/power-of-two invariants from the
//! testable-properties section.

use telemetry_core::RingBuffer;

/// S1 — capacity 4 holds `capacity - 1` items; a push past that fails;
/// pops come back in push order.
#[test]
fn scenario_s1_spsc_correctness() {
    let rb: RingBuffer<u32> = RingBuffer::new(4).unwrap();
    assert!(rb.try_push(1));
    assert!(rb.try_push(2));
    assert!(rb.try_push(3));
    assert_eq!(rb.size(), 3);
    assert!(rb.full());
    assert!(!rb.try_push(4));

    assert_eq!(rb.try_pop(), Some(1));
    assert_eq!(rb.try_pop(), Some(2));
    assert_eq!(rb.try_pop(), Some(3));
    assert_eq!(rb.try_pop(), None);
}

#[test]
fn invariant_no_loss_when_pushes_precede_pops() {
    let rb: RingBuffer<u32> = RingBuffer::new(16).unwrap();
    for i in 0..10 {
        assert!(rb.try_push(i));
    }
    for i in 0..10 {
        assert_eq!(rb.try_pop(), Some(i));
    }
}

#[test]
fn invariant_capacity_is_power_of_two() {
    let rb: RingBuffer<u8> = RingBuffer::new(5).unwrap();
    assert_eq!(rb.capacity(), 8);
    assert_eq!(rb.mask(), 7);
}

#[test]
fn spsc_fifo_holds_under_concurrent_producer_and_consumer() {
    use std::sync::Arc;
    use std::thread;

    let rb: Arc<RingBuffer<u32>> = Arc::new(RingBuffer::new(1024).unwrap());
    let producer_rb = rb.clone();
    let producer = thread::spawn(move || {
        let mut i = 0u32;
        while i < 10_000 {
            if producer_rb.try_push(i) {
                i += 1;
            }
        }
    });

    let mut received = Vec::with_capacity(10_000);
    while received.len() < 10_000 {
        if let Some(v) = rb.try_pop() {
            received.push(v);
        }
    }
    producer.join().unwrap();

    let expected: Vec<u32> = (0..10_000).collect();
    assert_eq!(received, expected);
}
