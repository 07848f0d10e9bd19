//! Registry of named thread pools, a process-wide thread-count cap, and a
//! background sampler that watches CPU/memory pressure and can latch an
//! emergency stop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::RwLock;
use sysinfo::System;
use tracing::{info, warn};

use crate::constants::{
    DEFAULT_MAX_TOTAL_THREADS, DEFAULT_STATS_INTERVAL_MS, RESOURCE_PRESSURE_CPU_PCT, RESOURCE_PRESSURE_MEM_PCT,
};
use crate::error::{Result, TelemetryError};
use crate::signal::{CoreEvent, SharedEventSink};
use crate::threadpool::{SchedulingPolicy, ThreadPool};

/// Thread manager configuration.
#[derive(Debug, Clone)]
pub struct ThreadManagerConfig {
    pub max_total_threads: usize,
    pub stats_interval_ms: u64,
    pub cpu_pressure_pct: f32,
    pub mem_pressure_pct: f32,
}

impl Default for ThreadManagerConfig {
    fn default() -> Self {
        Self {
            max_total_threads: DEFAULT_MAX_TOTAL_THREADS,
            stats_interval_ms: DEFAULT_STATS_INTERVAL_MS,
            cpu_pressure_pct: RESOURCE_PRESSURE_CPU_PCT,
            mem_pressure_pct: RESOURCE_PRESSURE_MEM_PCT,
        }
    }
}

/// The default pool's size: `max(2, min(16, cores * 0.75))`.
pub fn default_pool_size() -> usize {
    let cores = num_cpus::get();
    ((cores as f64) * 0.75).floor().max(2.0).min(16.0) as usize
}

struct Sampler {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Owns every named [`ThreadPool`] in the process, enforces a combined
/// thread-count ceiling, and samples system load on a timer.
pub struct ThreadManager {
    pools: RwLock<HashMap<String, Arc<ThreadPool>>>,
    total_threads: AtomicUsize,
    config: ThreadManagerConfig,
    sink: SharedEventSink,
    emergency_stopped: Arc<AtomicBool>,
    sampler: RwLock<Option<Sampler>>,
}

impl ThreadManager {
    pub fn new(config: ThreadManagerConfig, sink: SharedEventSink) -> Arc<Self> {
        let manager = Arc::new(Self {
            pools: RwLock::new(HashMap::new()),
            total_threads: AtomicUsize::new(0),
            config,
            sink,
            emergency_stopped: Arc::new(AtomicBool::new(false)),
            sampler: RwLock::new(None),
        });
        manager.create_pool("default", default_pool_size(), SchedulingPolicy::WorkStealing).expect(
            "creating the default pool with a freshly constructed, empty manager cannot exceed the thread cap",
        );
        manager
    }

    /// Create a named pool with `threads` workers. Fails if the name is
    /// already taken or would push the process past `max_total_threads`.
    pub fn create_pool(&self, name: impl Into<String>, threads: usize, policy: SchedulingPolicy) -> Result<()> {
        let name = name.into();
        let mut pools = self.pools.write();
        if pools.contains_key(&name) {
            return Err(TelemetryError::config(format!("thread pool `{name}` already exists")));
        }
        let current = self.total_threads.load(Ordering::Relaxed);
        if current + threads > self.config.max_total_threads {
            return Err(TelemetryError::capacity(format!(
                "creating pool `{name}` with {threads} threads would exceed the cap of {}",
                self.config.max_total_threads
            )));
        }
        let pool = Arc::new(ThreadPool::new(name.clone(), threads, policy));
        self.total_threads.fetch_add(threads, Ordering::Relaxed);
        pools.insert(name.clone(), pool);
        self.sink.emit(CoreEvent::PoolCreated { name: name.clone() });
        info!(pool = %name, threads, "thread pool created");
        Ok(())
    }

    /// Remove and shut down a named pool. The `default` pool may be removed
    /// like any other; callers that depend on it should recreate it first.
    pub fn remove_pool(&self, name: &str) -> Result<()> {
        let pool = self
            .pools
            .write()
            .remove(name)
            .ok_or_else(|| TelemetryError::config(format!("no such thread pool `{name}`")))?;
        self.total_threads.fetch_sub(pool.thread_count(), Ordering::Relaxed);
        if let Ok(pool) = Arc::try_unwrap(pool) {
            pool.shutdown();
        }
        self.sink.emit(CoreEvent::PoolRemoved { name: name.to_string() });
        Ok(())
    }

    pub fn pool(&self, name: &str) -> Option<Arc<ThreadPool>> {
        self.pools.read().get(name).cloned()
    }

    pub fn total_threads(&self) -> usize {
        self.total_threads.load(Ordering::Relaxed)
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stopped.load(Ordering::Relaxed)
    }

    /// Latch the emergency-stop flag; once set it is never cleared
    /// automatically. Emits `emergency_stop` exactly once per transition.
    pub fn trigger_emergency_stop(&self) {
        if !self.emergency_stopped.swap(true, Ordering::SeqCst) {
            warn!("emergency stop triggered");
            self.sink.emit(CoreEvent::EmergencyStopTriggered);
        }
    }

    /// Start the background resource sampler. Idempotent.
    pub fn start_sampling(self: &Arc<Self>) {
        if self.sampler.read().is_some() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let manager = self.clone();
        let stop_clone = stop.clone();
        let period = Duration::from_millis(self.config.stats_interval_ms);
        let handle = thread::Builder::new()
            .name("telemetry-thread-manager-sampler".into())
            .spawn(move || {
                let mut system = System::new_all();
                while !stop_clone.load(Ordering::Relaxed) {
                    thread::sleep(period);
                    system.refresh_cpu_all();
                    system.refresh_memory();
                    let cpu_pct = system.global_cpu_usage();
                    let mem_pct = if system.total_memory() > 0 {
                        (system.used_memory() as f64 / system.total_memory() as f64 * 100.0) as f32
                    } else {
                        0.0
                    };
                    if cpu_pct >= manager.config.cpu_pressure_pct || mem_pct >= manager.config.mem_pressure_pct {
                        manager.sink.emit(CoreEvent::ResourcePressure { cpu_pct, mem_pct });
                    }
                }
            })
            .expect("failed to spawn resource sampler thread");
        *self.sampler.write() = Some(Sampler { handle, stop });
    }

    /// Stop the background sampler, if running.
    pub fn stop_sampling(&self) {
        if let Some(sampler) = self.sampler.write().take() {
            sampler.stop.store(true, Ordering::Relaxed);
            let _ = sampler.handle.join();
        }
    }
}
