//! A work-stealing thread pool: one `crossbeam_deque::Worker` per thread,
//! a shared `Injector` for externally submitted tasks, and `Stealer` handles
//! so idle workers can pull from busier ones.

pub mod manager;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::deque::{Injector, Steal, Stealer, Worker};
use tracing::debug;

pub use manager::ThreadManager;

/// How idle workers choose where to look for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingPolicy {
    #[default]
    WorkStealing,
    RoundRobin,
    LeastLoaded,
}

/// Relative importance of a submitted task; purely advisory under
/// work-stealing (it only affects which local queue end a task enters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Per-worker task statistics.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub executed: AtomicU64,
    pub stolen: AtomicU64,
}

/// A named pool of worker threads sharing one injector queue.
pub struct ThreadPool {
    name: String,
    injector: Arc<Injector<Task>>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    stats: Arc<WorkerStats>,
    policy: SchedulingPolicy,
}

impl ThreadPool {
    /// Spawn `threads` workers immediately; `policy` only changes how idle
    /// workers pick a victim to steal from.
    pub fn new(name: impl Into<String>, threads: usize, policy: SchedulingPolicy) -> Self {
        let name = name.into();
        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let stats = Arc::new(WorkerStats::default());

        let workers: Vec<Worker<Task>> = (0..threads.max(1)).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Task>> = workers.iter().map(Worker::stealer).collect();

        let handles = workers
            .into_iter()
            .enumerate()
            .map(|(idx, worker)| {
                let injector = injector.clone();
                let stealers = stealers.clone();
                let shutdown = shutdown.clone();
                let active = active.clone();
                let stats = stats.clone();
                let pool_name = name.clone();
                thread::Builder::new()
                    .name(format!("{pool_name}-worker-{idx}"))
                    .spawn(move || worker_loop(worker, injector, stealers, shutdown, active, stats, policy, idx))
                    .expect("failed to spawn thread pool worker")
            })
            .collect();

        Self { name, injector, handles, shutdown, active, stats, policy }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Submit a task to the shared injector queue; any idle worker may pick
    /// it up. `priority` is currently advisory only (see module docs).
    pub fn submit(&self, _priority: TaskPriority, task: impl FnOnce() + Send + 'static) {
        self.injector.push(Box::new(task));
    }

    /// Number of tasks currently executing across all workers.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn executed_count(&self) -> u64 {
        self.stats.executed.load(Ordering::Relaxed)
    }

    /// Signal shutdown and join every worker thread. Tasks already queued
    /// but not yet picked up are dropped without running.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    local: Worker<Task>,
    injector: Arc<Injector<Task>>,
    stealers: Vec<Stealer<Task>>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    stats: Arc<WorkerStats>,
    policy: SchedulingPolicy,
    idx: usize,
) {
    let mut backoff_spins = 0u32;
    loop {
        let task = find_task(&local, &injector, &stealers, policy, idx);
        match task {
            Some(task) => {
                backoff_spins = 0;
                active.fetch_add(1, Ordering::Relaxed);
                task();
                active.fetch_sub(1, Ordering::Relaxed);
                stats.executed.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
                backoff_spins = (backoff_spins + 1).min(8);
                thread::sleep(Duration::from_micros(50 * backoff_spins as u64));
            }
        }
    }
}

fn find_task(
    local: &Worker<Task>,
    injector: &Injector<Task>,
    stealers: &[Stealer<Task>],
    policy: SchedulingPolicy,
    self_idx: usize,
) -> Option<Task> {
    if let Some(task) = local.pop() {
        return Some(task);
    }
    loop {
        match injector.steal_batch_and_pop(local) {
            Steal::Success(task) => return Some(task),
            Steal::Retry => continue,
            Steal::Empty => break,
        }
    }
    let order: Vec<usize> = match policy {
        SchedulingPolicy::RoundRobin => {
            (1..=stealers.len()).map(|offset| (self_idx + offset) % stealers.len()).collect()
        }
        SchedulingPolicy::WorkStealing | SchedulingPolicy::LeastLoaded => (0..stealers.len()).collect(),
    };
    for i in order {
        if i == self_idx {
            continue;
        }
        loop {
            match stealers[i].steal() {
                Steal::Success(task) => {
                    debug!(victim = i, thief = self_idx, "stole task");
                    return Some(task);
                }
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn executes_submitted_tasks() {
        let pool = ThreadPool::new("test", 4, SchedulingPolicy::WorkStealing);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            pool.submit(TaskPriority::Normal, move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        // give workers time to drain the injector
        thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::Relaxed), 100);
        pool.shutdown();
    }

    #[test]
    fn single_worker_pool_still_runs_tasks() {
        let pool = ThreadPool::new("solo", 1, SchedulingPolicy::WorkStealing);
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        pool.submit(TaskPriority::High, move || {
            counter2.fetch_add(1, Ordering::Relaxed);
        });
        thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        pool.shutdown();
    }
}
