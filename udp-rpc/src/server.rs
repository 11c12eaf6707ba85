//! Server side: receive, validate, deduplicate, execute, reply.
//!
//! ```text
//!  datagram ─▶ validate ──bad──▶ "???"
//!                 │
//!                 ▼
//!           history hit? ──yes──▶ replay stored bytes
//!                 │ no (or at-least-once)
//!                 ▼
//!           Service::call ─▶ subscribe caller / push callbacks
//!                 │
//!                 ▼
//!           encode ─▶ store (at-most-once) ─▶ reply to sender
//! ```
//!
//! A reply that would not fit in one datagram is replaced by an ERROR reply
//! before it is stored, so the caller always hears back and every
//! retransmission replays the same error.
//!
//! Datagrams are handled one at a time on the receive loop.  A separate
//! task wakes every `sweep_interval` to purge expired leases and history.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::envelope::{Request, Response, Status, MALFORMED_REPLY};
use crate::history::{HistoryConfig, HistoryKey, ReplyHistory};
use crate::registry::SubscriberRegistry;
use crate::semantics::Semantics;
use crate::service::{Peer, Service};
use crate::simulator::SimulatorConfig;
use crate::socket::{Socket, SocketError, MAX_DATAGRAM};

/// Message of the ERROR reply sent in place of an oversized one.
pub const REPLY_TOO_LARGE: &str = "Reply too large";

/// Server tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub semantics: Semantics,
    pub history: HistoryConfig,
    /// Period of the background lease/history sweep.
    pub sweep_interval: Duration,
    pub faults: SimulatorConfig,
}

impl ServerConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            semantics: Semantics::default(),
            history: HistoryConfig::default(),
            sweep_interval: Duration::from_secs(60),
            faults: SimulatorConfig::default(),
        }
    }

    pub fn semantics(mut self, semantics: Semantics) -> Self {
        self.semantics = semantics;
        self
    }

    pub fn history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    pub fn sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval = every;
        self
    }

    pub fn faults(mut self, faults: SimulatorConfig) -> Self {
        self.faults = faults;
        self
    }
}

/// Datagram counters, updated by the receive loop.
#[derive(Debug, Default)]
pub struct ServerStats {
    received: AtomicU64,
    replayed: AtomicU64,
    executed: AtomicU64,
    malformed: AtomicU64,
}

impl ServerStats {
    /// Datagrams read off the socket.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Duplicates answered from the reply history.
    pub fn replayed(&self) -> u64 {
        self.replayed.load(Ordering::Relaxed)
    }

    /// Requests handed to the service.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Datagrams that failed envelope validation.
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A bound server running service `S`.
pub struct Server<S: Service> {
    socket: Arc<Socket>,
    semantics: Semantics,
    service: Arc<S>,
    history: ReplyHistory,
    registry: Arc<SubscriberRegistry>,
    stats: Arc<ServerStats>,
    sweep_interval: Duration,
}

impl<S: Service> Server<S> {
    pub async fn bind(config: ServerConfig, service: S) -> Result<Self, SocketError> {
        let socket = Socket::bind_with(config.bind, config.faults.clone()).await?;
        log::info!(
            "server listening on {} ({}, history ttl {}s cap {})",
            socket.local_addr,
            config.semantics,
            config.history.ttl.as_secs(),
            config.history.capacity
        );
        Ok(Self {
            socket: Arc::new(socket),
            semantics: config.semantics,
            service: Arc::new(service),
            history: ReplyHistory::with_config(config.history),
            registry: Arc::new(SubscriberRegistry::new()),
            stats: Arc::new(ServerStats::default()),
            sweep_interval: config.sweep_interval,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn semantics(&self) -> Semantics {
        self.semantics
    }

    pub fn service(&self) -> Arc<S> {
        Arc::clone(&self.service)
    }

    pub fn registry(&self) -> Arc<SubscriberRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn history(&self) -> ReplyHistory {
        self.history.clone()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Receive loop.  Only returns on a fatal socket error.
    pub async fn run(self) -> Result<(), SocketError> {
        let sweeper = self.spawn_sweeper();
        let result = self.serve().await;
        sweeper.abort();
        result
    }

    /// Run the server on its own task.
    pub fn spawn(self) -> JoinHandle<Result<(), SocketError>> {
        tokio::spawn(self.run())
    }

    async fn serve(&self) -> Result<(), SocketError> {
        loop {
            match self.socket.recv_from().await {
                Ok((bytes, from)) => self.handle_datagram(&bytes, from).await,
                Err(SocketError::Oversize { from }) => {
                    ServerStats::bump(&self.stats.received);
                    ServerStats::bump(&self.stats.malformed);
                    log::warn!("oversize datagram from {from}");
                    self.reply(MALFORMED_REPLY, from).await;
                }
                Err(SocketError::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionReset
                            | std::io::ErrorKind::ConnectionRefused
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    log::debug!("transient receive error: {e}");
                }
                Err(e) => {
                    log::error!("receive loop stopped: {e}");
                    return Err(e);
                }
            }
        }
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let history = self.history.clone();
        let every = self.sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let leases = registry.sweep();
                let replies = history.cleanup_expired();
                if leases > 0 || replies > 0 {
                    log::debug!("sweep: {leases} lease(s), {replies} stored reply(ies) expired");
                }
            }
        })
    }

    /// Process one raw datagram from `from`.
    pub async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        ServerStats::bump(&self.stats.received);

        let request = match Request::decode(bytes) {
            Ok(request) => request,
            Err(e) => {
                ServerStats::bump(&self.stats.malformed);
                log::warn!("malformed {}-byte datagram from {from}: {e}", bytes.len());
                self.reply(MALFORMED_REPLY, from).await;
                return;
            }
        };

        let key = HistoryKey::new(from, request.request_id);
        if self.semantics.deduplicates() {
            if let Some(stored) = self.history.get(&key) {
                ServerStats::bump(&self.stats.replayed);
                log::info!(
                    "duplicate request id={} from {from}; replaying stored reply",
                    request.request_id
                );
                self.reply(&stored, from).await;
                return;
            }
        }

        let response = self.execute(&request, from).await;
        let mut encoded = response.encode();
        if encoded.len() > MAX_DATAGRAM {
            log::warn!(
                "reply to id={} from {from} is {} bytes (limit {MAX_DATAGRAM}); sending error",
                request.request_id,
                encoded.len()
            );
            encoded =
                Response::new(request.request_id, Status::Error, REPLY_TOO_LARGE).encode();
        }
        let encoded: Arc<[u8]> = if self.semantics.deduplicates() {
            self.history.insert(key, encoded)
        } else {
            Arc::from(encoded)
        };
        self.reply(&encoded, from).await;
    }

    async fn execute(&self, request: &Request, from: SocketAddr) -> Response {
        ServerStats::bump(&self.stats.executed);
        log::debug!(
            "executing request id={} op={} from {from}",
            request.request_id,
            request.op
        );

        match self.service.call(request, Peer { addr: from }) {
            Ok(outcome) => {
                if let Some(lease) = outcome.subscribe {
                    self.registry.subscribe(from, lease);
                }
                for update in &outcome.notifications {
                    self.registry.notify(&self.socket, update).await;
                }
                outcome.to_response(request.request_id)
            }
            Err(e) => {
                log::info!("request id={} from {from} failed: {e}", request.request_id);
                Response::new(request.request_id, Status::Error, e.to_string())
            }
        }
    }

    async fn reply(&self, bytes: &[u8], to: SocketAddr) {
        if let Err(e) = self.socket.send_to(bytes, to).await {
            log::warn!("reply to {to} not sent: {e}");
        }
    }
}
