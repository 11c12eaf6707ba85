//! Client side: send a request, wait for the correlated reply, maybe retry.
//!
//! [`RpcClient`] owns one socket and runs a small state machine per call:
//!
//! ```text
//!            ┌──────────── resend same bytes (at-least-once, budget left) ─┐
//!            ▼                                                              │
//!  ──▶ SEND ──▶ WAIT ──reply with our id──▶ DONE                            │
//!               │  ▲                                                        │
//!               │  └── callback → handler / noise / stale/foreign → dropped │
//!               └── attempt timeout ───────────────────────────────────────┘
//!                                   └─ at-most-once or budget spent ─▶ NoResponse
//! ```
//!
//! Callbacks share the socket with replies.  They are forwarded to the
//! channel returned by [`RpcClient::callbacks`] and never consume an
//! attempt.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::envelope::{Request, Response};
use crate::semantics::Semantics;
use crate::simulator::SimulatorConfig;
use crate::socket::{Socket, SocketError};
use crate::timer::{AttemptClock, RetryPolicy};

/// Everything needed to open a client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    /// Local address to bind; port 0 picks an ephemeral port.
    pub bind: SocketAddr,
    pub semantics: Semantics,
    pub retry: RetryPolicy,
    pub faults: SimulatorConfig,
}

impl ClientConfig {
    pub fn new(server: SocketAddr) -> Self {
        let bind = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        Self {
            server,
            bind,
            semantics: Semantics::default(),
            retry: RetryPolicy::default(),
            faults: SimulatorConfig::default(),
        }
    }

    pub fn semantics(mut self, semantics: Semantics) -> Self {
        self.semantics = semantics;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn faults(mut self, faults: SimulatorConfig) -> Self {
        self.faults = faults;
        self
    }
}

/// Why a call produced no reply.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// No valid reply arrived within the attempt timeout (at-most-once) or
    /// the cumulative retry deadline (at-least-once).
    #[error("no response after {attempts} attempt(s) in {elapsed:?}")]
    NoResponse { attempts: u32, elapsed: Duration },
    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// Returns true if the error is likely transient (keep waiting).
fn is_transient_io_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
    )
}

/// One client session: a socket, a request-id counter, a retry policy.
pub struct RpcClient {
    socket: Socket,
    server: SocketAddr,
    semantics: Semantics,
    retry: RetryPolicy,
    next_id: AtomicI32,
    callbacks: Mutex<Option<mpsc::UnboundedSender<Response>>>,
    // Replies are matched by whoever is reading the socket, so calls on one
    // session run one at a time.
    in_flight: tokio::sync::Mutex<()>,
}

impl RpcClient {
    /// Bind a fresh socket and open a session against `config.server`.
    pub async fn connect(config: ClientConfig) -> Result<Self, InvokeError> {
        let socket = Socket::bind_with(config.bind, config.faults.clone()).await?;
        let first_id = rand::rng().random_range(0..1000);
        log::info!(
            "client {} → {} ({}, first request id {first_id})",
            socket.local_addr,
            config.server,
            config.semantics
        );
        Ok(Self {
            socket,
            server: config.server,
            semantics: config.semantics,
            retry: config.retry,
            next_id: AtomicI32::new(first_id),
            callbacks: Mutex::new(None),
            in_flight: tokio::sync::Mutex::new(()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn semantics(&self) -> Semantics {
        self.semantics
    }

    /// Route callbacks that arrive while waiting for replies to a channel.
    ///
    /// Replaces any earlier receiver.  Without one, callbacks are logged
    /// and dropped.
    pub fn callbacks(&self) -> mpsc::UnboundedReceiver<Response> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.callbacks.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    fn deliver_callback(&self, callback: Response) {
        let guard = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) if tx.send(callback).is_ok() => {}
            _ => log::debug!("callback with no listener dropped"),
        }
    }

    /// Call operation `op` with `payload` and wait for the reply.
    ///
    /// A reply with ERROR or FAIL status is still `Ok`; only the absence of
    /// any valid reply is an error.
    pub async fn invoke(&self, op: i32, payload: Vec<u8>) -> Result<Response, InvokeError> {
        let _turn = self.in_flight.lock().await;

        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = Request::new(request_id, op, payload).encode();
        let mut clock = AttemptClock::start(self.retry);

        loop {
            self.socket.send_to(&bytes, self.server).await?;
            let deadline = clock.begin_attempt();
            log::debug!(
                "→ request id={request_id} op={op} attempt={}",
                clock.attempts()
            );

            if let Some(reply) = self.await_reply(request_id, deadline).await? {
                log::debug!(
                    "← reply id={request_id} status={} after {} attempt(s)",
                    reply.status,
                    clock.attempts()
                );
                return Ok(reply);
            }

            if !self.semantics.retries() || clock.expired() {
                log::warn!(
                    "request id={request_id} op={op}: no response after {} attempt(s)",
                    clock.attempts()
                );
                return Err(InvokeError::NoResponse {
                    attempts: clock.attempts(),
                    elapsed: clock.elapsed(),
                });
            }
            log::debug!("request id={request_id} timed out; retransmitting");
        }
    }

    /// Read until the reply for `request_id` arrives or `deadline` passes.
    async fn await_reply(
        &self,
        request_id: i32,
        deadline: Instant,
    ) -> Result<Option<Response>, InvokeError> {
        loop {
            match timeout_at(deadline, self.socket.recv_from()).await {
                Err(_elapsed) => return Ok(None),
                Ok(Err(SocketError::Oversize { from })) => {
                    log::debug!("ignoring oversize datagram from {from}");
                }
                Ok(Err(SocketError::Io(e))) if is_transient_io_error(&e) => {
                    log::debug!("transient receive error: {e}");
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((_, from))) if from != self.server => {
                    log::debug!("ignoring datagram from {from}: not the server");
                }
                Ok(Ok((bytes, from))) => match Response::decode(&bytes) {
                    Err(e) => log::debug!("ignoring {}-byte noise from {from}: {e}", bytes.len()),
                    Ok(resp) if resp.is_callback() => self.deliver_callback(resp),
                    Ok(resp) if resp.request_id != request_id => {
                        log::debug!("ignoring stale reply id={}", resp.request_id);
                    }
                    Ok(resp) => return Ok(Some(resp)),
                },
            }
        }
    }

    /// Wait for the next callback with no request outstanding.
    ///
    /// Returns `Ok(None)` once `deadline` passes.  Any non-callback datagram
    /// is a late reply and is discarded.
    pub async fn next_callback(&self, deadline: Instant) -> Result<Option<Response>, InvokeError> {
        let _turn = self.in_flight.lock().await;
        loop {
            match timeout_at(deadline, self.socket.recv_from()).await {
                Err(_elapsed) => return Ok(None),
                Ok(Err(SocketError::Oversize { from })) => {
                    log::debug!("ignoring oversize datagram from {from}");
                }
                Ok(Err(SocketError::Io(e))) if is_transient_io_error(&e) => {
                    log::debug!("transient receive error: {e}");
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok((_, from))) if from != self.server => {
                    log::debug!("ignoring datagram from {from}: not the server");
                }
                Ok(Ok((bytes, from))) => match Response::decode(&bytes) {
                    Ok(resp) if resp.is_callback() => return Ok(Some(resp)),
                    Ok(resp) => log::debug!("ignoring late reply id={}", resp.request_id),
                    Err(e) => log::debug!("ignoring {}-byte noise from {from}: {e}", bytes.len()),
                },
            }
        }
    }

    /// Tear the session down, releasing its socket.
    pub fn close(self) {
        log::info!("client {} closed", self.socket.local_addr);
    }
}
