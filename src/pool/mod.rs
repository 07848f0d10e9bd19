//! Named fixed-block memory pools with O(1) acquire/release.
//!
//! Grounded on `original_source/src/packet/core/packet_buffer.h`'s
//! `MemoryPoolManager` collaborator: pools are independent (no cross-pool
//! transfer), each protects its own free list with a lightweight lock, and a
//! handle returned by `allocate` carries enough information (owning pool
//! name, capacity) that `Drop` can return it without a side lookup table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::constants::{DEFAULT_MEMORY_PRESSURE_THRESHOLD, POOL_SIZE_CLASSES};
use crate::error::{Result, TelemetryError};
use crate::signal::{CoreEvent, SharedEventSink};

/// One fixed-size block pool. Blocks are boxed byte buffers tracked by a
/// free list of indices; `total` blocks are preallocated up front.
struct FixedPool {
    block_size: usize,
    blocks: Vec<Box<[u8]>>,
    free_list: Mutex<Vec<usize>>,
    in_use: AtomicUsize,
}

impl FixedPool {
    fn new(block_size: usize, block_count: usize) -> Self {
        let blocks: Vec<Box<[u8]>> = (0..block_count)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();
        let free_list = Mutex::new((0..block_count).collect());
        Self {
            block_size,
            blocks,
            free_list,
            in_use: AtomicUsize::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.blocks.len()
    }

    fn acquire(&self) -> Option<usize> {
        let mut free = self.free_list.lock();
        let idx = free.pop()?;
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Some(idx)
    }

    fn release(&self, idx: usize) {
        debug_assert!(idx < self.blocks.len(), "block index out of range for this pool");
        let mut free = self.free_list.lock();
        debug_assert!(!free.contains(&idx), "double-return of pool block");
        free.push(idx);
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }

    fn utilization(&self) -> f64 {
        let in_use = self.in_use.load(Ordering::Relaxed) as f64;
        let cap = self.blocks.len() as f64;
        if cap == 0.0 { 0.0 } else { in_use / cap }
    }
}

/// Per-pool statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub block_size: usize,
    pub capacity: usize,
    pub in_use: usize,
    pub utilization: f64,
}

/// A handle to one block acquired from a named pool. Move-only: dropping it
/// returns the block to its owning pool exactly once.
pub struct PooledBlock {
    pool: Arc<FixedPool>,
    pool_name: String,
    index: usize,
    len: usize,
    returned: bool,
}

impl PooledBlock {
    /// The logical size written into this block (may be less than capacity).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The block's capacity (its pool's size class).
    pub fn capacity(&self) -> usize {
        self.pool.block_size
    }

    /// Name of the owning pool.
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.pool.blocks[self.index][..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        // SAFETY: each `PooledBlock` owns exclusive access to its index while
        // it is outstanding; the free list never hands the same index to two
        // live blocks at once.
        let ptr = self.pool.blocks[self.index].as_ptr() as *mut u8;
        unsafe { std::slice::from_raw_parts_mut(ptr, len) }
    }

    /// Resize the logical length in place without reallocating (must fit
    /// within the underlying block capacity).
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.capacity(), "logical length exceeds block capacity");
        self.len = len;
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        if !self.returned {
            self.pool.release(self.index);
            self.returned = true;
        }
    }
}

/// Manager owning a registry of independent named pools. Pools are created
/// at startup in the common case; creation after allocation has begun is
/// permitted (each pool is independently reference-counted) but not
/// encouraged.
pub struct PoolManager {
    pools: RwLock<HashMap<String, Arc<FixedPool>>>,
    sink: SharedEventSink,
    pressure_threshold: f64,
}

impl PoolManager {
    /// Create an empty manager with the default memory-pressure threshold.
    pub fn new(sink: SharedEventSink) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            sink,
            pressure_threshold: DEFAULT_MEMORY_PRESSURE_THRESHOLD,
        }
    }

    /// Create the standard set of pools at the documented size classes,
    /// each with `block_count` preallocated blocks.
    pub fn with_standard_classes(sink: SharedEventSink, block_count: usize) -> Result<Self> {
        let manager = Self::new(sink);
        for size in POOL_SIZE_CLASSES {
            manager.create_pool(&format!("class_{size}"), size, block_count)?;
        }
        Ok(manager)
    }

    /// Register a new named pool. Fails if the name is already registered.
    pub fn create_pool(&self, name: &str, block_size: usize, block_count: usize) -> Result<()> {
        let mut pools = self.pools.write();
        if pools.contains_key(name) {
            return Err(TelemetryError::config(format!("pool `{name}` already exists")));
        }
        pools.insert(name.to_string(), Arc::new(FixedPool::new(block_size, block_count)));
        Ok(())
    }

    fn total_utilization_locked(pools: &HashMap<String, Arc<FixedPool>>) -> f64 {
        if pools.is_empty() {
            return 0.0;
        }
        let sum: f64 = pools.values().map(|p| p.utilization()).sum();
        sum / (pools.len() as f64)
    }

    /// Acquire a block from the named pool sized for at least `len` logical
    /// bytes (the pool's block size is the capacity; `len` sets the initial
    /// logical length). Returns `None` on exhaustion.
    pub fn allocate(&self, name: &str, len: usize) -> Option<PooledBlock> {
        let pools = self.pools.read();
        let pool = pools.get(name)?.clone();
        if len > pool.block_size {
            return None;
        }
        let index = pool.acquire()?;
        let utilization = Self::total_utilization_locked(&pools);
        if utilization > self.pressure_threshold {
            self.sink.emit(CoreEvent::MemoryPressure { utilization });
        }
        Some(PooledBlock {
            pool,
            pool_name: name.to_string(),
            index,
            len,
            returned: false,
        })
    }

    /// Round `requested` bytes up to the smallest registered standard class
    /// `>= requested` and allocate from it. Returns `None` if no class fits.
    pub fn allocate_for_size(&self, requested: usize) -> Option<PooledBlock> {
        let class = POOL_SIZE_CLASSES.iter().find(|&&c| c >= requested)?;
        self.allocate(&format!("class_{class}"), requested)
    }

    /// Snapshot of one pool's statistics.
    pub fn stats(&self, name: &str) -> Option<PoolStats> {
        let pools = self.pools.read();
        let pool = pools.get(name)?;
        let in_use = pool.in_use.load(Ordering::Relaxed);
        Some(PoolStats {
            block_size: pool.block_size,
            capacity: pool.capacity(),
            in_use,
            utilization: pool.utilization(),
        })
    }

    /// Average utilization across all registered pools.
    pub fn total_utilization(&self) -> f64 {
        Self::total_utilization_locked(&self.pools.read())
    }
}

/// Explicit deallocation of a foreign pointer/index is a contract violation
/// (see module docs); the pool instead enforces ownership through
/// [`PooledBlock`]'s `Drop` impl, which can only ever release the index it
/// was handed at `allocate` time. This warning helper is used by callers
/// that detect a double-return attempt through other means (e.g. FFI).
pub fn warn_double_return(pool_name: &str) {
    warn!(pool = pool_name, "attempted double-return of a pool block");
}
