//! Operation-dispatch contract between the server loop and the application.
//!
//! The dispatcher knows nothing about operation codes.  It hands each
//! validated [`Request`] to a [`Service`], which returns an [`Outcome`]:
//! the reply fields, plus side-channel instructions the dispatcher carries
//! out on the service's behalf (register the caller for callbacks, push
//! state-change notifications to subscribers).
//!
//! Any [`ServiceError`] becomes an ERROR-status reply carrying its message.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::envelope::{Request, Response, Status};

/// Failure raised by a service while handling a request.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The operation code is not one the service implements.
    #[error("Unknown operation code {0}")]
    UnknownOperation(i32),
    /// The payload did not match the operation's field layout.
    #[error("Malformed payload: {0}")]
    BadPayload(#[from] CodecError),
    /// A business rule refused the request.
    #[error("{0}")]
    Rejected(String),
}

impl ServiceError {
    pub fn rejected(reason: impl ToString) -> Self {
        ServiceError::Rejected(reason.to_string())
    }
}

/// Result of executing one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// [`Status::Ok`] or [`Status::Fail`].
    pub status: Status,
    pub message: String,
    pub payload: Vec<u8>,
    /// Register (or refresh) the caller as a subscriber for this long.
    pub subscribe: Option<Duration>,
    /// Callbacks to broadcast after the request commits.
    pub notifications: Vec<Response>,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
            payload: Vec::new(),
            subscribe: None,
            notifications: Vec::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            ..Self::ok(message)
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn subscribe_caller(mut self, lease: Duration) -> Self {
        self.subscribe = Some(lease);
        self
    }

    pub fn notify(mut self, message: impl Into<String>, payload: Vec<u8>) -> Self {
        self.notifications.push(Response::callback(message, payload));
        self
    }

    /// Reply envelope for `request_id`.
    ///
    /// A service cannot turn a direct reply into a callback; such a status
    /// is downgraded to ERROR.
    pub fn to_response(&self, request_id: i32) -> Response {
        let status = match self.status {
            Status::Callback => Status::Error,
            other => other,
        };
        Response::new(request_id, status, self.message.clone()).with_payload(self.payload.clone())
    }
}

/// Who sent the request being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub addr: SocketAddr,
}

/// Application logic behind the server loop.
pub trait Service: Send + Sync + 'static {
    fn call(&self, request: &Request, peer: Peer) -> Result<Outcome, ServiceError>;
}

/// Adapter turning a closure into a [`Service`]; see [`service_fn`].
pub struct ServiceFn<F>(F);

pub fn service_fn<F>(f: F) -> ServiceFn<F>
where
    F: Fn(&Request, Peer) -> Result<Outcome, ServiceError> + Send + Sync + 'static,
{
    ServiceFn(f)
}

impl<F> Service for ServiceFn<F>
where
    F: Fn(&Request, Peer) -> Result<Outcome, ServiceError> + Send + Sync + 'static,
{
    fn call(&self, request: &Request, peer: Peer) -> Result<Outcome, ServiceError> {
        (self.0)(request, peer)
    }
}
