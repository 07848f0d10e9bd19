//! The orchestration root: wires the factory, dispatcher, subscription
//! manager, event loop, and thread manager together behind one lifecycle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::constants::ERROR_LOG_CAPACITY;
use crate::dispatcher::{DispatcherConfig, PacketDispatcher};
use crate::error::{Result, TelemetryError};
use crate::event_loop::{EventLoop, EventLoopConfig};
use crate::packet::{FactoryConfig, PacketFactory};
use crate::pool::PoolManager;
use crate::signal::{CoreEvent, EventSink, SharedEventSink};
use crate::source::simulation::{default_config, SimulationSource};
use crate::source::PacketSource;
use crate::structure::StructureProvider;
use crate::subscription::SubscriptionManager;
use crate::threadpool::manager::ThreadManagerConfig;
use crate::threadpool::ThreadManager;

/// Orchestration-root lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ManagerState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Starting = 3,
    Running = 4,
    Stopping = 5,
    Error = 6,
}

impl ManagerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Ready,
            3 => Self::Starting,
            4 => Self::Running,
            5 => Self::Stopping,
            _ => Self::Error,
        }
    }
}

/// Top-level configuration bundling every subsystem's config.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub factory: FactoryConfig,
    pub dispatcher: DispatcherConfig,
    pub event_loop: EventLoopConfig,
    pub thread_manager: ThreadManagerConfig,
    pub pool_block_count: usize,
    pub structure_provider: Option<Arc<dyn StructureProvider>>,
}

struct ErrorSink {
    state: Arc<ManagerInner>,
}

impl EventSink for ErrorSink {
    fn emit(&self, event: CoreEvent) {
        if let CoreEvent::ErrorOccurred { message } | CoreEvent::SourceError { message, .. } = &event {
            self.state.push_error(message.clone());
        }
        self.state.sink.emit(event);
    }
}

struct ManagerInner {
    errors: Mutex<VecDeque<String>>,
    sink: SharedEventSink,
}

impl ManagerInner {
    fn push_error(&self, message: String) {
        let mut errors = self.errors.lock();
        if errors.len() >= ERROR_LOG_CAPACITY {
            errors.pop_front();
        }
        errors.push_back(message);
    }
}

/// Owns every subsystem and exposes the single top-level lifecycle:
/// `initialize -> start -> stop`.
pub struct PacketManager {
    state: AtomicU8,
    config: ManagerConfig,
    inner: Arc<ManagerInner>,
    sink: SharedEventSink,

    pools: Mutex<Option<Arc<PoolManager>>>,
    factory: Mutex<Option<Arc<PacketFactory>>>,
    subscriptions: Mutex<Option<Arc<SubscriptionManager>>>,
    dispatcher: Mutex<Option<Arc<PacketDispatcher>>>,
    event_loop: Mutex<Option<Arc<EventLoop>>>,
    thread_manager: Mutex<Option<Arc<ThreadManager>>>,
    default_source: Mutex<Option<Arc<SimulationSource>>>,
}

impl PacketManager {
    pub fn new(config: ManagerConfig, sink: SharedEventSink) -> Self {
        let inner = Arc::new(ManagerInner { errors: Mutex::new(VecDeque::new()), sink: sink.clone() });
        Self {
            state: AtomicU8::new(ManagerState::Uninitialized as u8),
            config,
            inner,
            sink,
            pools: Mutex::new(None),
            factory: Mutex::new(None),
            subscriptions: Mutex::new(None),
            dispatcher: Mutex::new(None),
            event_loop: Mutex::new(None),
            thread_manager: Mutex::new(None),
            default_source: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ManagerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn require_state(&self, expected: ManagerState) -> Result<()> {
        let current = self.state();
        if current != expected {
            return Err(TelemetryError::config(format!("expected manager state {expected:?}, found {current:?}")));
        }
        Ok(())
    }

    /// Wire the structure provider, thread pools, event loop, and memory
    /// pools into the factory and dispatcher, then create the default
    /// simulation source. Idempotent only from `Uninitialized`.
    pub fn initialize(&self) -> Result<()> {
        self.require_state(ManagerState::Uninitialized)?;
        self.set_state(ManagerState::Initializing);

        let error_sink: SharedEventSink = Arc::new(ErrorSink { state: self.inner.clone() });

        let pools = Arc::new(PoolManager::with_standard_classes(error_sink.clone(), self.config.pool_block_count)?);
        let factory = Arc::new(PacketFactory::new(pools.clone(), self.config.factory.clone()));
        if let Some(provider) = &self.config.structure_provider {
            factory.set_structure_provider(provider.clone());
        }

        let subscriptions = Arc::new(SubscriptionManager::new(error_sink.clone()));
        let dispatcher =
            Arc::new(PacketDispatcher::new(self.config.dispatcher.clone(), subscriptions.clone(), error_sink.clone()));
        let event_loop = Arc::new(EventLoop::new(self.config.event_loop.clone(), error_sink.clone()));
        let thread_manager = ThreadManager::new(self.config.thread_manager.clone(), error_sink.clone());

        let default_source =
            Arc::new(SimulationSource::new(default_config(), factory.clone(), error_sink.clone()));
        {
            let dispatcher = dispatcher.clone();
            let name = default_source.name().to_string();
            default_source.handle().set_packet_callback(move |packet| dispatcher.ingest(&name, &packet));
        }
        dispatcher.register_source(default_source.name().to_string(), default_source.clone())?;

        *self.pools.lock() = Some(pools);
        *self.factory.lock() = Some(factory);
        *self.subscriptions.lock() = Some(subscriptions);
        *self.dispatcher.lock() = Some(dispatcher);
        *self.event_loop.lock() = Some(event_loop);
        *self.thread_manager.lock() = Some(thread_manager);
        *self.default_source.lock() = Some(default_source);

        self.set_state(ManagerState::Ready);
        Ok(())
    }

    /// Start the dispatcher, the event loop timer, resource sampling, and
    /// the default source.
    pub fn start(&self) -> Result<()> {
        self.require_state(ManagerState::Ready)?;
        self.set_state(ManagerState::Starting);

        self.dispatcher.lock().as_ref().expect("initialized").start();
        self.event_loop.lock().as_ref().expect("initialized").start();
        self.thread_manager.lock().as_ref().expect("initialized").start_sampling();
        self.default_source.lock().as_ref().expect("initialized").start()?;

        self.set_state(ManagerState::Running);
        Ok(())
    }

    /// Reverse `start`: stop the default source first, then the ambient
    /// subsystems, returning to `Ready`.
    pub fn stop(&self) -> Result<()> {
        self.require_state(ManagerState::Running)?;
        self.set_state(ManagerState::Stopping);

        if let Some(source) = self.default_source.lock().as_ref() {
            source.stop()?;
        }
        self.dispatcher.lock().as_ref().expect("initialized").stop();
        self.event_loop.lock().as_ref().expect("initialized").stop();
        self.thread_manager.lock().as_ref().expect("initialized").stop_sampling();

        self.set_state(ManagerState::Ready);
        Ok(())
    }

    pub fn factory(&self) -> Option<Arc<PacketFactory>> {
        self.factory.lock().clone()
    }

    pub fn dispatcher(&self) -> Option<Arc<PacketDispatcher>> {
        self.dispatcher.lock().clone()
    }

    pub fn subscriptions(&self) -> Option<Arc<SubscriptionManager>> {
        self.subscriptions.lock().clone()
    }

    pub fn thread_manager(&self) -> Option<Arc<ThreadManager>> {
        self.thread_manager.lock().clone()
    }

    /// The last (up to) 100 error messages retained, oldest first.
    pub fn recent_errors(&self) -> Vec<String> {
        self.inner.errors.lock().iter().cloned().collect()
    }
}
