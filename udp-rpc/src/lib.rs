//! `udp-rpc` — request/reply over UDP with selectable invocation semantics
//! and leased server-push callbacks.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐   request (id, op, payload)   ┌────────────────────────┐
//!  │ RpcClient  │──────────────────────────────▶│ Server                 │
//!  │ retry loop │◀──────────────────────────────│  ReplyHistory (dedup)  │
//!  └─────┬──────┘   reply (id, status, msg)     │  Service::call         │
//!        │                                      │  SubscriberRegistry    │
//!        │◀───────── callback (id 0) ───────────│                        │
//!        │                                      └──────────┬─────────────┘
//!  ┌─────▼──────────────────────────────────────────────────▼────┐
//!  │ Socket (tokio UdpSocket + optional Simulator)               │
//!  └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`codec`]      — little-endian field encoding and the [`Wire`] trait
//! - [`envelope`]   — request / response framing and status codes
//! - [`semantics`]  — at-most-once vs at-least-once
//! - [`timer`]      — per-attempt and cumulative retry deadlines
//! - [`client`]     — retrying sender, reply correlation, callback routing
//! - [`server`]     — validate / dedup / execute / reply loop
//! - [`history`]    — bounded reply cache keyed by client endpoint + request id
//! - [`registry`]   — leased callback subscribers
//! - [`service`]    — the contract application logic implements
//! - [`simulator`]  — optional lossy network layer for testing
//! - [`socket`]     — async UDP socket abstraction

pub mod client;
pub mod codec;
pub mod envelope;
pub mod history;
pub mod registry;
pub mod semantics;
pub mod server;
pub mod service;
pub mod simulator;
pub mod socket;
pub mod timer;

pub use client::{ClientConfig, InvokeError, RpcClient};
pub use codec::{CodecError, Reader, Wire, Writer};
pub use envelope::{Request, Response, Status};
pub use history::HistoryConfig;
pub use semantics::Semantics;
pub use server::{Server, ServerConfig, ServerStats, REPLY_TOO_LARGE};
pub use service::{service_fn, Outcome, Peer, Service, ServiceError};
pub use simulator::SimulatorConfig;
pub use socket::{Socket, SocketError, MAX_DATAGRAM};
pub use timer::RetryPolicy;
