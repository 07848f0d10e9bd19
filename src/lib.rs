//! Real-time telemetry ingestion and routing substrate.
//!
//! A [`PacketManager`] wires together a lock-free SPSC [`ring_buffer`], a
//! class-based memory [`pool`], a [`packet`] factory, a priority
//! [`event_loop`], a work-stealing [`threadpool`], pluggable packet
//! [`source`]s, a [`subscription`]-based fan-out router, and a
//! [`dispatcher`] that ties sources to subscribers under backpressure.

pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod event_loop;
pub mod manager;
pub mod packet;
pub mod pool;
pub mod ring_buffer;
pub mod signal;
pub mod source;
pub mod structure;
pub mod subscription;
pub mod threadpool;

pub use dispatcher::{DispatcherConfig, DispatcherStats, PacketDispatcher};
pub use error::{Result, TelemetryError};
pub use event_loop::{Event, EventLoop, EventLoopConfig, Priority};
pub use manager::{ManagerConfig, ManagerState, PacketManager};
pub use packet::{FactoryConfig, Packet, PacketFactory, PacketHeader};
pub use pool::{PoolManager, PoolStats};
pub use ring_buffer::RingBuffer;
pub use signal::{CoreEvent, EventSink, SharedEventSink};
pub use source::{PacketSource, SharedPacketSource, SourceConfig, SourceHandle, SourceState};
pub use structure::{StructureDescriptor, StructureProvider};
pub use subscription::SubscriptionManager;
pub use threadpool::{manager::ThreadManagerConfig, ThreadManager, ThreadPool};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::null_sink;

    #[test]
    fn manager_runs_end_to_end_with_default_source() {
        let config = ManagerConfig { pool_block_count: 32, ..Default::default() };
        let manager = PacketManager::new(config, null_sink());
        manager.initialize().unwrap();
        manager.start().unwrap();
        assert_eq!(manager.state(), ManagerState::Running);
        manager.stop().unwrap();
        assert_eq!(manager.state(), ManagerState::Ready);
    }

    #[test]
    fn ring_buffer_round_trips_a_value() {
        let rb: RingBuffer<u64> = RingBuffer::new(8).unwrap();
        assert!(rb.try_push(42));
        assert_eq!(rb.try_pop(), Some(42));
    }
}
