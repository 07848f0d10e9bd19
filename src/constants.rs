//! Tuning constants and protocol limits shared across the telemetry core.

/// Fixed on-wire packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 24;

/// Default maximum payload size in bytes (64 KiB - 24-byte header).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 65_512;

/// Maximum total packet size (header + payload) accepted anywhere in the system.
pub const MAX_PACKET_SIZE: usize = 65_536;

/// Defined header flag bits. Anything outside this mask is `Reserved`.
pub const FLAG_PRIORITY: u32 = 1 << 0;
pub const FLAG_COMPRESSED: u32 = 1 << 1;
pub const FLAG_ENCRYPTED: u32 = 1 << 2;
pub const FLAG_FRAGMENTED: u32 = 1 << 3;
pub const FLAG_TEST_DATA: u32 = 1 << 4;
pub const FLAG_SIMULATION: u32 = 1 << 5;
pub const FLAG_NETWORK: u32 = 1 << 6;
pub const FLAG_OFFLINE: u32 = 1 << 7;

/// Union of all defined flag bits.
pub const DEFINED_FLAGS_MASK: u32 =
    FLAG_PRIORITY
        | FLAG_COMPRESSED
        | FLAG_ENCRYPTED
        | FLAG_FRAGMENTED
        | FLAG_TEST_DATA
        | FLAG_SIMULATION
        | FLAG_NETWORK
        | FLAG_OFFLINE;

/// Bits outside [`DEFINED_FLAGS_MASK`]; their presence is a protocol error.
pub const RESERVED_MASK: u32 = !DEFINED_FLAGS_MASK;

/// Pool size classes, in ascending order. A request for `n` bytes rounds up
/// to the smallest class `>= n`; larger requests fail.
pub const POOL_SIZE_CLASSES: [usize; 6] = [64, 512, 1024, 2048, 4096, 8192];

/// Global utilization threshold above which `memory_pressure` is emitted.
pub const DEFAULT_MEMORY_PRESSURE_THRESHOLD: f64 = 0.85;

/// Warn (not error) if a header's timestamp is this far in the future.
pub const CLOCK_SKEW_FUTURE_WARN_NS: u64 = 1_000_000_000; // 1s

/// Warn (not error) if a header's timestamp is older than this.
pub const CLOCK_SKEW_STALE_WARN_NS: u64 = 60_000_000_000; // 60s

/// Default TCP stream reassembly buffer cap.
pub const STREAM_BUFFER_MAX_SIZE: usize = 1024 * 1024; // 1 MiB

/// Consecutive parse errors on a TCP source before the connection resets.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Connection failures (across reconnects) before a TCP source gives up.
pub const MAX_CONNECTION_FAILURES: u32 = 5;

/// Cap applied to the exponential-backoff reconnect delay.
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;

/// Default event-loop delayed-dispatch timer period.
pub const DEFAULT_EVENT_TIMER_PERIOD_MS: u64 = 10;

/// Default per-type event queue depth before `queue_overflow` is emitted.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Default dispatcher backpressure threshold (in-flight packet count).
pub const DEFAULT_BACKPRESSURE_THRESHOLD: u32 = 1_000;

/// Default maximum number of sources a dispatcher may register.
pub const DEFAULT_MAX_SOURCES: u32 = 10;

/// Default process-wide thread cap enforced by the thread manager.
pub const DEFAULT_MAX_TOTAL_THREADS: usize = 128;

/// Default statistics/resource-sampling cadence.
pub const DEFAULT_STATS_INTERVAL_MS: u64 = 1_000;

/// CPU utilization threshold (percent) that triggers `resource_pressure`.
pub const RESOURCE_PRESSURE_CPU_PCT: f32 = 90.0;

/// Memory utilization threshold (percent) that triggers `resource_pressure`.
pub const RESOURCE_PRESSURE_MEM_PCT: f32 = 90.0;

/// Bounded ring of retained error messages in the packet manager.
pub const ERROR_LOG_CAPACITY: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_mask_is_complement_of_defined_flags() {
        assert_eq!(RESERVED_MASK & DEFINED_FLAGS_MASK, 0);
        assert_eq!(RESERVED_MASK | DEFINED_FLAGS_MASK, u32::MAX);
    }

    #[test]
    fn pool_classes_are_ascending() {
        for pair in POOL_SIZE_CLASSES.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
