//! A pure priority queue plus delayed-dispatch timer. Carries lifecycle and
//! system-wide events; it is never on the packet hot path.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::constants::{DEFAULT_EVENT_TIMER_PERIOD_MS, DEFAULT_MAX_QUEUE_SIZE};
use crate::signal::{CoreEvent, SharedEventSink};

/// Event priority, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Critical,
}

/// A named event carrying an arbitrary string-keyed data map.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub priority: Priority,
    pub timestamp: Instant,
    pub data: HashMap<String, Value>,
    consumed: Arc<AtomicBool>,
    /// Monotonic insertion counter; used to break priority ties FIFO.
    seq: u64,
}

impl Event {
    pub fn new(event_type: impl Into<String>, priority: Priority) -> Self {
        Self {
            event_type: event_type.into(),
            priority,
            timestamp: Instant::now(),
            data: HashMap::new(),
            consumed: Arc::new(AtomicBool::new(false)),
            seq: 0,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Halt further handler invocation for this event.
    pub fn consume(&self) {
        self.consumed.store(true, Ordering::Relaxed);
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Relaxed)
    }
}

/// Ordering for the max-heap: higher priority first; among equal priorities,
/// the older entry (smaller `seq`) wins, i.e. FIFO within a priority band.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Event {}
impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Event {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;
type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

struct DelayedEntry {
    fire_at: Instant,
    event: Event,
}

struct State {
    queues: HashMap<String, BinaryHeap<Event>>,
    handlers: HashMap<String, Vec<Handler>>,
    filters: HashMap<String, Filter>,
    delayed: Vec<DelayedEntry>,
    next_seq: u64,
    max_queue_size: usize,
    paused: bool,
}

/// Priority event loop configuration.
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    pub max_queue_size: usize,
    pub timer_period_ms: u64,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            timer_period_ms: DEFAULT_EVENT_TIMER_PERIOD_MS,
        }
    }
}

/// Priority queue of named events with a delayed-dispatch timer and
/// per-type filters/handlers.
pub struct EventLoop {
    state: Arc<Mutex<State>>,
    sink: SharedEventSink,
    running: Arc<AtomicBool>,
    timer_period: Duration,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    pub fn new(config: EventLoopConfig, sink: SharedEventSink) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                queues: HashMap::new(),
                handlers: HashMap::new(),
                filters: HashMap::new(),
                delayed: Vec::new(),
                next_seq: 0,
                max_queue_size: config.max_queue_size,
                paused: false,
            })),
            sink,
            running: Arc::new(AtomicBool::new(false)),
            timer_period: Duration::from_millis(config.timer_period_ms),
            timer_thread: Mutex::new(None),
        }
    }

    /// Register a handler for `event_type`; handlers run in subscription
    /// order and any may call `Event::consume` to stop later handlers.
    pub fn subscribe(&self, event_type: impl Into<String>, handler: impl Fn(&Event) + Send + Sync + 'static) {
        let mut state = self.state.lock();
        state.handlers.entry(event_type.into()).or_default().push(Arc::new(handler));
    }

    /// Install a predicate that, if present and false, drops the event
    /// before any handler runs.
    pub fn set_filter(&self, event_type: impl Into<String>, filter: impl Fn(&Event) -> bool + Send + Sync + 'static) {
        self.state.lock().filters.insert(event_type.into(), Arc::new(filter));
    }

    /// Enqueue an event for later draining.
    pub fn post(&self, mut event: Event) {
        let mut state = self.state.lock();
        Self::enqueue(&mut state, &self.sink, &mut event);
    }

    fn enqueue(state: &mut State, sink: &SharedEventSink, event: &mut Event) {
        event.seq = state.next_seq;
        state.next_seq += 1;
        let queue = state.queues.entry(event.event_type.clone()).or_default();
        if queue.len() >= state.max_queue_size {
            sink.emit(CoreEvent::QueueOverflow { event_type: event.event_type.clone(), size: queue.len() });
            return;
        }
        queue.push(event.clone());
    }

    /// Place an event on the delayed list; a background timer moves it into
    /// the live queue once `delay` elapses.
    pub fn post_delayed(&self, event: Event, delay: Duration) {
        let mut state = self.state.lock();
        state.delayed.push(DelayedEntry { fire_at: Instant::now() + delay, event });
    }

    /// Pause: events still accumulate but no handlers run until `resume`.
    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
    }

    /// Start the background delayed-dispatch timer thread.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return; // idempotent
        }
        let state = self.state.clone();
        let sink = self.sink.clone();
        let running = self.running.clone();
        let period = self.timer_period;
        let handle = thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                thread::sleep(period);
                let now = Instant::now();
                let mut state = state.lock();
                let ready: Vec<usize> =
                    state.delayed.iter().enumerate().filter(|(_, e)| e.fire_at <= now).map(|(i, _)| i).collect();
                for i in ready.into_iter().rev() {
                    let mut entry = state.delayed.remove(i);
                    Self::enqueue(&mut state, &sink, &mut entry.event);
                }
            }
        });
        *self.timer_thread.lock() = Some(handle);
    }

    /// Stop the timer thread. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.timer_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Drain every queued event across all types, invoking handlers in
    /// priority order (subject to filters and `pause`).
    pub fn process_queued_events(&self) {
        let types: Vec<String> = self.state.lock().queues.keys().cloned().collect();
        for t in types {
            self.process_queued_events_for(&t);
        }
    }

    /// Drain the queue for one event type.
    pub fn process_queued_events_for(&self, event_type: &str) {
        loop {
            let event = {
                let mut state = self.state.lock();
                if state.paused {
                    return;
                }
                match state.queues.get_mut(event_type).and_then(|q| q.pop()) {
                    Some(e) => e,
                    None => return,
                }
            };
            self.dispatch(event);
        }
    }

    fn dispatch(&self, event: Event) {
        let started = Instant::now();
        let (passed_filter, handlers) = {
            let state = self.state.lock();
            let passed = state.filters.get(&event.event_type).map_or(true, |f| f(&event));
            let handlers = state.handlers.get(&event.event_type).cloned().unwrap_or_default();
            (passed, handlers)
        };
        if !passed_filter {
            return;
        }

        for handler in &handlers {
            if event.is_consumed() {
                break;
            }
            handler(&event);
        }
        let elapsed_us = started.elapsed().as_micros() as u64;
        self.sink.emit(CoreEvent::EventProcessed { event_type: event.event_type.clone(), processing_time_us: elapsed_us });
        debug!(event_type = %event.event_type, elapsed_us, "event processed");
    }
}
