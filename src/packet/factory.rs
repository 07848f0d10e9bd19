//! Constructs and validates packets: from raw bytes, from `(id, payload)`,
//! by cloning, or by resolving a structure descriptor. Assigns monotonic
//! per-factory sequence numbers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::warn;

use crate::constants::{DEFAULT_MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE};
use crate::error::{Result, TelemetryError};
use crate::packet::buffer::{allocate_packet_block, Packet};
use crate::packet::header::PacketHeader;
use crate::pool::PoolManager;
use crate::structure::{StructureDescriptor, StructureProvider};

/// Factory configuration.
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    pub max_payload_size: u32,
    /// Smoothing factor for the rolling-average creation-time EMA.
    pub ema_alpha: f64,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self { max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE, ema_alpha: 0.5 }
    }
}

/// Snapshot of factory statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactoryStats {
    pub total_created: u64,
    pub from_raw: u64,
    pub from_structure: u64,
    pub errors: u64,
    pub bytes_allocated: u64,
    pub avg_creation_time_ns: f64,
}

struct Counters {
    total_created: AtomicU64,
    from_raw: AtomicU64,
    from_structure: AtomicU64,
    errors: AtomicU64,
    bytes_allocated: AtomicU64,
    ema_creation_ns: Mutex<f64>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            total_created: AtomicU64::new(0),
            from_raw: AtomicU64::new(0),
            from_structure: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            ema_creation_ns: Mutex::new(0.0),
        }
    }
}

/// Builds packets backed by pooled buffers and assigns a strictly increasing
/// sequence number per successful creation.
pub struct PacketFactory {
    pools: Arc<PoolManager>,
    config: FactoryConfig,
    sequence: AtomicU32,
    counters: Counters,
    structure_provider: Mutex<Option<Arc<dyn StructureProvider>>>,
    structure_cache: Mutex<HashMap<u32, Weak<StructureDescriptor>>>,
}

impl PacketFactory {
    pub fn new(pools: Arc<PoolManager>, config: FactoryConfig) -> Self {
        Self {
            pools,
            config,
            sequence: AtomicU32::new(0),
            counters: Counters::default(),
            structure_provider: Mutex::new(None),
            structure_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Inject (or replace) the structure provider used by
    /// [`PacketFactory::create_from_structure`].
    pub fn set_structure_provider(&self, provider: Arc<dyn StructureProvider>) {
        *self.structure_provider.lock() = Some(provider);
    }

    /// Invalidate the whole structure cache, e.g. on an external
    /// `structure_removed` notification (the cache is keyed by packet id,
    /// not structure name, so a per-entry invalidation would require a
    /// reverse index; wholesale invalidation matches the original source's
    /// behavior on schema reload).
    pub fn invalidate_structure_cache(&self) {
        self.structure_cache.lock().clear();
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn record_success(&self, started: Instant, bytes: usize, kind: CreationKind) {
        self.counters.total_created.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_allocated.fetch_add(bytes as u64, Ordering::Relaxed);
        match kind {
            CreationKind::FromRaw => {
                self.counters.from_raw.fetch_add(1, Ordering::Relaxed);
            }
            CreationKind::FromStructure => {
                self.counters.from_structure.fetch_add(1, Ordering::Relaxed);
            }
            CreationKind::Plain | CreationKind::Clone => {}
        }
        let elapsed_ns = started.elapsed().as_nanos() as f64;
        let mut ema = self.counters.ema_creation_ns.lock();
        *ema = self.config.ema_alpha * elapsed_ns + (1.0 - self.config.ema_alpha) * *ema;
    }

    fn record_error(&self) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Allocate a buffer sized `24 + payload_size`, stamp the header with
    /// the current timestamp and next sequence number, and copy `payload`
    /// in if provided.
    pub fn create(&self, id: u32, payload: Option<&[u8]>, payload_size: u32) -> Result<Packet> {
        let started = Instant::now();
        if payload_size > self.config.max_payload_size {
            self.record_error();
            return Err(TelemetryError::PayloadTooLarge {
                size: payload_size as usize,
                max: self.config.max_payload_size as usize,
            });
        }

        let mut block = allocate_packet_block(&self.pools, payload_size).map_err(|e| {
            self.record_error();
            e
        })?;
        block.set_len(PACKET_HEADER_SIZE + payload_size as usize);

        let header = PacketHeader::new(id, self.next_sequence(), payload_size);
        let bytes = block.as_mut_slice();
        bytes[..PACKET_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        if let Some(payload) = payload {
            let n = payload.len().min(payload_size as usize);
            bytes[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + n].copy_from_slice(&payload[..n]);
        }

        let packet = crate::packet::buffer::Packet::from_block(block).map_err(|e| {
            self.record_error();
            e
        })?;
        self.record_success(started, PACKET_HEADER_SIZE + payload_size as usize, CreationKind::Plain);
        Ok(packet)
    }

    /// Build a packet by copying `len >= 24` raw bytes verbatim, validating
    /// the embedded header.
    pub fn create_from_raw(&self, bytes: &[u8]) -> Result<Packet> {
        let started = Instant::now();
        if bytes.len() < PACKET_HEADER_SIZE {
            self.record_error();
            return Err(TelemetryError::invalid_header("fewer than 24 bytes supplied"));
        }
        let header = PacketHeader::from_bytes(bytes).map_err(|e| {
            self.record_error();
            e
        })?;
        let expected_total = PACKET_HEADER_SIZE + header.payload_size as usize;
        if bytes.len() != expected_total {
            self.record_error();
            return Err(TelemetryError::invalid_header(format!(
                "buffer length {} inconsistent with header-implied size {}",
                bytes.len(),
                expected_total
            )));
        }
        if let Err(e) = header.validate(self.config.max_payload_size) {
            self.record_error();
            return Err(e);
        }

        let mut block = allocate_packet_block(&self.pools, header.payload_size).map_err(|e| {
            self.record_error();
            e
        })?;
        block.set_len(expected_total);
        block.as_mut_slice().copy_from_slice(bytes);

        let packet = crate::packet::buffer::Packet::from_block(block).map_err(|e| {
            self.record_error();
            e
        })?;
        self.record_success(started, expected_total, CreationKind::FromRaw);
        Ok(packet)
    }

    /// Clone an existing packet by re-parsing its raw bytes (the new packet
    /// gets a fresh pooled buffer; timestamp is preserved since it is copied
    /// byte-for-byte, unlike a fresh `create_from_raw` of externally
    /// received bytes).
    pub fn clone_packet(&self, packet: &Packet) -> Result<Packet> {
        self.create_from_raw(packet.as_bytes()).map_err(|e| {
            self.record_error();
            e
        })
    }

    /// Resolve `structure_name` through the injected provider and associate
    /// the descriptor as a weak reference on the resulting packet.
    pub fn create_from_structure(
        &self,
        id: u32,
        structure_name: &str,
        payload: Option<&[u8]>,
        size: Option<u32>,
    ) -> Result<Packet> {
        let started = Instant::now();
        let provider = self.structure_provider.lock().clone().ok_or_else(|| {
            self.record_error();
            TelemetryError::config("no structure provider configured")
        })?;
        let descriptor = provider.resolve(structure_name).ok_or_else(|| {
            self.record_error();
            TelemetryError::config(format!("unknown structure `{structure_name}`"))
        })?;
        let payload_size = size
            .or_else(|| provider.payload_size_of(structure_name))
            .or_else(|| payload.map(|p| p.len() as u32))
            .unwrap_or(0);

        let mut packet = self.create(id, payload, payload_size)?;
        packet.set_structure(&descriptor);
        self.structure_cache.lock().insert(id, Arc::downgrade(&descriptor));
        self.record_success(started, PACKET_HEADER_SIZE + payload_size as usize, CreationKind::FromStructure);
        Ok(packet)
    }

    /// Called when the owning structure schema is removed externally;
    /// invalidates the whole cache (see [`PacketFactory::invalidate_structure_cache`]).
    pub fn on_structure_removed(&self, _name: &str) {
        warn!("structure removed upstream, invalidating packet factory structure cache");
        self.invalidate_structure_cache();
    }

    /// Snapshot of factory statistics.
    pub fn stats(&self) -> FactoryStats {
        FactoryStats {
            total_created: self.counters.total_created.load(Ordering::Relaxed),
            from_raw: self.counters.from_raw.load(Ordering::Relaxed),
            from_structure: self.counters.from_structure.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            bytes_allocated: self.counters.bytes_allocated.load(Ordering::Relaxed),
            avg_creation_time_ns: *self.counters.ema_creation_ns.lock(),
        }
    }
}

enum CreationKind {
    Plain,
    FromRaw,
    FromStructure,
    #[allow(dead_code)]
    Clone,
}
