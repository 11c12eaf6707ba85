//! Leased callback subscriptions.
//!
//! A client registers its address and port for a limited lease.  Until the
//! lease runs out, every state change the service reports is pushed to it as
//! a [`Status::Callback`] datagram.  Delivery is fire-and-forget: no ack, no
//! retry, and a send error drops the subscriber on the spot.  An update too
//! large for one datagram is refused locally and skipped; that says nothing
//! about the subscribers, so none are dropped for it.
//!
//! Expired leases are purged lazily before each subscribe/notify and by the
//! server's periodic sweep task.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::envelope::{Response, Status};
use crate::socket::{Socket, SocketError};

/// Address → lease expiry.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    leases: Mutex<HashMap<SocketAddr, Instant>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn leases(&self) -> MutexGuard<'_, HashMap<SocketAddr, Instant>> {
        self.leases.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `subscriber` until `now + lease`, or refresh its expiry.
    pub fn subscribe(&self, subscriber: SocketAddr, lease: Duration) {
        let now = Instant::now();
        let mut leases = self.leases();
        leases.retain(|_, expiry| *expiry > now);
        let refreshed = leases.insert(subscriber, now + lease).is_some();
        log::info!(
            "[registry] {} {subscriber} for {}s ({} live)",
            if refreshed { "refreshed" } else { "added" },
            lease.as_secs_f64(),
            leases.len()
        );
    }

    /// Drop expired leases; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut leases = self.leases();
        let before = leases.len();
        leases.retain(|_, expiry| *expiry > now);
        let removed = before - leases.len();
        if removed > 0 {
            log::debug!("[registry] swept {removed} expired subscriber(s)");
        }
        removed
    }

    /// Subscribers whose lease has not yet run out.
    pub fn live_subscribers(&self) -> Vec<SocketAddr> {
        let now = Instant::now();
        let mut leases = self.leases();
        leases.retain(|_, expiry| *expiry > now);
        leases.keys().copied().collect()
    }

    pub fn contains(&self, subscriber: &SocketAddr) -> bool {
        let now = Instant::now();
        self.leases()
            .get(subscriber)
            .is_some_and(|expiry| *expiry > now)
    }

    pub fn unsubscribe(&self, subscriber: &SocketAddr) -> bool {
        self.leases().remove(subscriber).is_some()
    }

    /// Number of entries, including any not yet swept.
    pub fn len(&self) -> usize {
        self.leases().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push `update` to every live subscriber.
    ///
    /// Returns the number of datagrams handed to the socket.  The lock is
    /// not held across sends.
    pub async fn notify(&self, socket: &Socket, update: &Response) -> usize {
        debug_assert_eq!(update.status, Status::Callback);
        let targets = self.live_subscribers();
        if targets.is_empty() {
            return 0;
        }

        log::debug!(
            "[registry] notifying {} subscriber(s): {}",
            targets.len(),
            update.message
        );
        let bytes = update.encode();
        let mut delivered = 0;
        for target in targets {
            match socket.send_to(&bytes, target).await {
                Ok(()) => delivered += 1,
                Err(SocketError::TooLarge { len }) => {
                    log::warn!(
                        "[registry] skipping {len}-byte update \"{}\": exceeds one datagram",
                        update.message
                    );
                    break;
                }
                Err(e) => {
                    log::warn!("[registry] dropping subscriber {target}: {e}");
                    self.unsubscribe(&target);
                }
            }
        }
        delivered
    }
}
