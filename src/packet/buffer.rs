//! Pool-backed packet storage: a packet exclusively owns a pooled buffer of
//! `24 + payload_size` bytes, header bytes at offset 0, payload following
//! contiguously.

use std::sync::{Arc, Weak};

use crate::constants::PACKET_HEADER_SIZE;
use crate::error::{Result, TelemetryError};
use crate::packet::header::PacketHeader;
use crate::pool::{PoolManager, PooledBlock};
use crate::structure::StructureDescriptor;

/// An immutable-except-for-header packet: `sequence`, `flags`, and
/// `timestamp_ns` may be rewritten in place; `id` and `payload_size` are
/// fixed at construction.
pub struct Packet {
    block: PooledBlock,
    structure: Option<Weak<StructureDescriptor>>,
}

impl Packet {
    /// Wrap a pooled block whose first 24 bytes already hold a valid header.
    /// `block.len()` must equal `24 + header.payload_size`.
    pub(crate) fn from_block(block: PooledBlock) -> Result<Self> {
        let header = PacketHeader::from_bytes(block.as_slice())?;
        let expected = PACKET_HEADER_SIZE + header.payload_size as usize;
        if block.len() != expected {
            return Err(TelemetryError::invalid_header(format!(
                "buffer length {} does not match header-implied size {}",
                block.len(),
                expected
            )));
        }
        Ok(Self { block, structure: None })
    }

    /// Total packet size on the wire: `24 + payload_size`.
    pub fn total_size(&self) -> usize {
        self.block.len()
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader::from_bytes(self.block.as_slice()).expect("header was validated at construction")
    }

    pub fn id(&self) -> u32 {
        self.header().id
    }

    pub fn sequence(&self) -> u32 {
        self.header().sequence
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.header().timestamp_ns
    }

    pub fn payload_size(&self) -> u32 {
        self.header().payload_size
    }

    pub fn flags(&self) -> u32 {
        self.header().flags
    }

    pub fn payload(&self) -> &[u8] {
        &self.block.as_slice()[PACKET_HEADER_SIZE..]
    }

    /// All bytes of the packet (header + payload), as they appear on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.block.as_slice()
    }

    fn rewrite_header(&mut self, f: impl FnOnce(&mut PacketHeader)) {
        let mut header = self.header();
        f(&mut header);
        self.block.as_mut_slice()[..PACKET_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    pub fn set_sequence(&mut self, sequence: u32) {
        self.rewrite_header(|h| h.sequence = sequence);
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.rewrite_header(|h| h.flags = flags);
    }

    pub fn add_flag(&mut self, flag: u32) {
        self.rewrite_header(|h| h.flags |= flag);
    }

    pub fn set_timestamp_ns(&mut self, timestamp_ns: u64) {
        self.rewrite_header(|h| h.timestamp_ns = timestamp_ns);
    }

    /// Associate a weak reference to a resolved structure descriptor. The
    /// packet does not own the descriptor.
    pub fn set_structure(&mut self, descriptor: &Arc<StructureDescriptor>) {
        self.structure = Some(Arc::downgrade(descriptor));
    }

    /// Upgrade the stored weak structure reference, if the descriptor is
    /// still alive.
    pub fn structure(&self) -> Option<Arc<StructureDescriptor>> {
        self.structure.as_ref().and_then(Weak::upgrade)
    }
}

/// Allocate a pooled block sized `24 + payload_size` from the pool manager,
/// rounding up to the smallest size class that fits.
pub(crate) fn allocate_packet_block(pools: &PoolManager, payload_size: u32) -> Result<PooledBlock> {
    let total = PACKET_HEADER_SIZE + payload_size as usize;
    pools
        .allocate_for_size(total)
        .ok_or_else(|| TelemetryError::pool_exhausted(format!("no pool available for {total} bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::factory::PacketFactory;
    use crate::pool::PoolManager;
    use crate::signal::null_sink;
    use std::sync::Arc;

    fn factory() -> PacketFactory {
        let pools = Arc::new(PoolManager::with_standard_classes(null_sink(), 8).unwrap());
        PacketFactory::new(pools, Default::default())
    }

    #[test]
    fn header_rewrite_preserves_payload() {
        let factory = factory();
        let mut packet = factory.create(7, Some(b"hello"), 5).unwrap();
        packet.set_sequence(99);
        assert_eq!(packet.sequence(), 99);
        assert_eq!(packet.payload(), b"hello");
    }
}
