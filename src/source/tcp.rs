//! A packet source reading a length-prefixed stream of packets off a TCP
//! connection, with stream reassembly and exponential-backoff reconnection.

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::constants::{
    MAX_CONNECTION_FAILURES, MAX_CONSECUTIVE_ERRORS, MAX_PACKET_SIZE, MAX_RECONNECT_DELAY_MS, PACKET_HEADER_SIZE,
    STREAM_BUFFER_MAX_SIZE,
};
use crate::error::Result;
use crate::packet::PacketFactory;
use crate::signal::{CoreEvent, SharedEventSink};
use crate::source::{PacketSource, SourceConfig, SourceHandle};

/// TCP connection lifecycle state, distinct from the broader
/// [`crate::source::SourceState`] machine that wraps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// TCP source configuration.
#[derive(Debug, Clone)]
pub struct TcpSourceConfig {
    pub base: SourceConfig,
    pub remote_addr: String,
    pub remote_port: u16,
    pub receive_buffer_size: usize,
    pub low_delay: bool,
    pub keep_alive: bool,
    pub keep_alive_interval_s: u64,
    pub connection_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl TcpSourceConfig {
    pub fn new(name: impl Into<String>, remote_addr: impl Into<String>, remote_port: u16) -> Self {
        Self {
            base: SourceConfig::new(name),
            remote_addr: remote_addr.into(),
            remote_port,
            receive_buffer_size: 64 * 1024,
            low_delay: true,
            keep_alive: true,
            keep_alive_interval_s: 30,
            connection_timeout_ms: 5_000,
            socket_timeout_ms: 1_000,
            reconnect_interval_ms: 1_000,
            max_reconnect_attempts: 0, // 0 = unlimited, bounded instead by MAX_CONNECTION_FAILURES
        }
    }
}

struct Session {
    stream: Mutex<Option<TcpStream>>,
    stream_buffer: Mutex<Vec<u8>>,
    connection_state: Mutex<ConnectionState>,
    consecutive_errors: AtomicU32,
    connection_failures: AtomicU32,
    attempt: AtomicU32,
}

impl Session {
    fn new() -> Self {
        Self {
            stream: Mutex::new(None),
            stream_buffer: Mutex::new(Vec::new()),
            connection_state: Mutex::new(ConnectionState::Disconnected),
            consecutive_errors: AtomicU32::new(0),
            connection_failures: AtomicU32::new(0),
            attempt: AtomicU32::new(0),
        }
    }
}

/// Reconnect delay: exponential backoff capped at 60s, +/-25% jitter,
/// floored at `base`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = 1u64 << attempt.min(6);
    let nominal = (base_ms.saturating_mul(exp)).min(MAX_RECONNECT_DELAY_MS);
    let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
    let jittered = (nominal as f64 * (1.0 + jitter_frac)).round() as u64;
    Duration::from_millis(jittered.max(base_ms))
}

/// Everything the background read thread needs; owned independently of
/// `TcpSource` so the worker closure borrows nothing with a lifetime.
struct Worker {
    handle: Arc<SourceHandle>,
    config: TcpSourceConfig,
    factory: Arc<PacketFactory>,
    sink: SharedEventSink,
    session: Arc<Session>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn set_connection_state(&self, new: ConnectionState) {
        let old = std::mem::replace(&mut *self.session.connection_state.lock().unwrap(), new);
        self.sink.emit(CoreEvent::ConnectionStateChanged {
            source: self.handle.name().to_string(),
            old: format!("{old:?}"),
            new: format!("{new:?}"),
        });
    }

    fn connect_to_host(&self) -> std::io::Result<TcpStream> {
        let addr: SocketAddr = format!("{}:{}", self.config.remote_addr, self.config.remote_port)
            .parse()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid remote address"))?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_millis(self.config.connection_timeout_ms))?;
        stream.set_nodelay(self.config.low_delay)?;
        stream.set_read_timeout(Some(Duration::from_millis(self.config.socket_timeout_ms)))?;
        Ok(stream)
    }

    /// Drain complete packets out of the stream buffer, handing each to the
    /// factory and delivering it through the source handle.
    fn parse_buffer(&self) {
        loop {
            let mut buffer = self.session.stream_buffer.lock().unwrap();
            if buffer.len() < PACKET_HEADER_SIZE {
                return;
            }
            let payload_size = u32::from_le_bytes(buffer[12..16].try_into().unwrap()) as usize;
            let expected = PACKET_HEADER_SIZE + payload_size;
            if expected < PACKET_HEADER_SIZE || expected > MAX_PACKET_SIZE {
                warn!(expected, "invalid packet length in tcp stream, resetting buffer");
                buffer.clear();
                self.session.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
            if buffer.len() < expected {
                return;
            }
            let raw: Vec<u8> = buffer.drain(..expected).collect();
            drop(buffer);

            match self.factory.create_from_raw(&raw) {
                Ok(packet) => {
                    self.session.consecutive_errors.store(0, Ordering::Relaxed);
                    self.handle.deliver(packet);
                }
                Err(e) => {
                    self.session.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                    self.handle.report_error(format!("failed to parse tcp packet: {e}"));
                }
            }

            if self.session.consecutive_errors.load(Ordering::Relaxed) > MAX_CONSECUTIVE_ERRORS {
                warn!("too many consecutive errors, resetting connection");
                self.session.stream_buffer.lock().unwrap().clear();
                *self.session.stream.lock().unwrap() = None;
                self.set_connection_state(ConnectionState::Disconnected);
                return;
            }
        }
    }

    fn on_disconnect(&self) {
        *self.session.stream.lock().unwrap() = None;
        self.sink.emit(CoreEvent::Disconnected { source: self.handle.name().to_string() });
        self.set_connection_state(ConnectionState::Disconnected);
    }

    /// Attempt to (re)connect, applying backoff after the first failure.
    /// Returns `false` once the source should give up entirely.
    fn try_connect(&self) -> bool {
        self.set_connection_state(ConnectionState::Connecting);
        match self.connect_to_host() {
            Ok(stream) => {
                *self.session.stream.lock().unwrap() = Some(stream);
                self.session.attempt.store(0, Ordering::Relaxed);
                self.set_connection_state(ConnectionState::Connected);
                self.sink.emit(CoreEvent::Connected { source: self.handle.name().to_string() });
                true
            }
            Err(e) => {
                let attempt = self.session.attempt.fetch_add(1, Ordering::Relaxed) + 1;
                let failures = self.session.connection_failures.fetch_add(1, Ordering::Relaxed) + 1;
                self.sink.emit(CoreEvent::ConnectionFailed {
                    source: self.handle.name().to_string(),
                    reason: e.to_string(),
                });

                let exceeded_attempts =
                    self.config.max_reconnect_attempts > 0 && attempt >= self.config.max_reconnect_attempts;
                if failures > MAX_CONNECTION_FAILURES || exceeded_attempts {
                    self.set_connection_state(ConnectionState::Failed);
                    self.handle.report_error(format!("tcp source exhausted reconnection attempts: {e}"));
                    return false;
                }
                self.set_connection_state(ConnectionState::Reconnecting);
                let delay = backoff_delay(self.config.reconnect_interval_ms, attempt - 1);
                thread::sleep(delay);
                true
            }
        }
    }

    fn run(&self) {
        let mut read_buf = vec![0u8; self.config.receive_buffer_size];
        loop {
            if !self.running.load(Ordering::Relaxed) {
                return;
            }
            let connected = { self.session.stream.lock().unwrap().is_some() };
            if !connected {
                if !self.try_connect() {
                    return; // failed permanently
                }
                continue;
            }

            let read_result = {
                let mut guard = self.session.stream.lock().unwrap();
                guard.as_mut().map(|s| s.read(&mut read_buf))
            };
            match read_result {
                Some(Ok(0)) => {
                    self.on_disconnect();
                }
                Some(Ok(n)) => {
                    let mut buffer = self.session.stream_buffer.lock().unwrap();
                    if buffer.len() + n > STREAM_BUFFER_MAX_SIZE {
                        warn!("tcp stream buffer overflow, resetting");
                        buffer.clear();
                        self.session.consecutive_errors.fetch_add(1, Ordering::Relaxed);
                    } else {
                        buffer.extend_from_slice(&read_buf[..n]);
                    }
                    drop(buffer);
                    self.parse_buffer();
                }
                Some(Err(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    // no data this tick, keep polling
                }
                Some(Err(e)) => {
                    self.handle.report_error(format!("tcp read error: {e}"));
                    self.on_disconnect();
                }
                None => {}
            }
        }
    }
}

/// TCP packet source: connects, reassembles the 24-byte-header + payload
/// stream, and reconnects with backoff on disconnect.
pub struct TcpSource {
    handle: Arc<SourceHandle>,
    config: TcpSourceConfig,
    factory: Arc<PacketFactory>,
    sink: SharedEventSink,
    session: Arc<Session>,
    running: Arc<AtomicBool>,
    worker_thread: Mutex<Option<JoinHandle<()>>>,
}

impl TcpSource {
    pub fn new(config: TcpSourceConfig, factory: Arc<PacketFactory>, sink: SharedEventSink) -> Self {
        let handle = Arc::new(SourceHandle::new(config.base.clone(), sink.clone()));
        Self {
            handle,
            config,
            factory,
            sink,
            session: Arc::new(Session::new()),
            running: Arc::new(AtomicBool::new(false)),
            worker_thread: Mutex::new(None),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.session.connection_state.lock().unwrap()
    }
}

impl PacketSource for TcpSource {
    fn handle(&self) -> &SourceHandle {
        &self.handle
    }

    fn start(&self) -> Result<()> {
        self.handle.begin_start()?;
        self.running.store(true, Ordering::SeqCst);

        let worker = Worker {
            handle: self.handle.clone(),
            config: self.config.clone(),
            factory: self.factory.clone(),
            sink: self.sink.clone(),
            session: self.session.clone(),
            running: self.running.clone(),
        };
        let thread_handle = thread::Builder::new()
            .name(format!("tcp-source-{}", self.handle.name()))
            .spawn(move || worker.run())
            .expect("failed to spawn tcp source worker");
        *self.worker_thread.lock().unwrap() = Some(thread_handle);
        self.handle.mark_running();
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.handle.begin_stop()?;
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker_thread.lock().unwrap().take() {
            let _ = worker.join();
        }
        *self.session.stream.lock().unwrap() = None;
        self.handle.mark_stopped();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let d0 = backoff_delay(1000, 0);
        assert!(d0.as_millis() >= 750 && d0.as_millis() <= 1250);
        let d_big = backoff_delay(1000, 20);
        assert!(d_big.as_millis() <= (MAX_RECONNECT_DELAY_MS as f64 * 1.25) as u128);
    }

    #[test]
    fn backoff_never_falls_below_base() {
        for attempt in 0..10 {
            let d = backoff_delay(500, attempt);
            assert!(d.as_millis() as u64 >= 500);
        }
    }

    /// Scenario S4: a packet arriving split across two TCP reads is still
    /// reassembled correctly once both chunks land in the stream buffer.
    #[test]
    fn scenario_s4_chunked_reassembly() {
        use crate::pool::PoolManager;
        use crate::signal::null_sink;
        use std::sync::Mutex as StdMutex;

        let pools = Arc::new(PoolManager::with_standard_classes(null_sink(), 8).unwrap());
        let factory = Arc::new(PacketFactory::new(pools, Default::default()));
        let packet = factory.create(42, Some(b"hello world"), 11).unwrap();
        let raw = packet.as_bytes().to_vec();

        let worker = Worker {
            handle: Arc::new(SourceHandle::new(SourceConfig::new("t"), null_sink())),
            config: TcpSourceConfig::new("t", "127.0.0.1", 0),
            factory: factory.clone(),
            sink: null_sink(),
            session: Arc::new(Session::new()),
            running: Arc::new(AtomicBool::new(true)),
        };
        let received = Arc::new(StdMutex::new(Vec::new()));
        {
            let received = received.clone();
            worker.handle.set_packet_callback(move |p| received.lock().unwrap().push(p.id()));
        }

        let (first, second) = raw.split_at(10);
        worker.session.stream_buffer.lock().unwrap().extend_from_slice(first);
        worker.parse_buffer();
        assert!(received.lock().unwrap().is_empty());

        worker.session.stream_buffer.lock().unwrap().extend_from_slice(second);
        worker.parse_buffer();
        assert_eq!(*received.lock().unwrap(), vec![42]);
    }
}
