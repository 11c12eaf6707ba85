//! Reply history for at-most-once execution.
//!
//! The server records the encoded response to every executed request,
//! keyed by `(client address, client port, request id)`.  A retransmission
//! that hits the history is answered with the stored bytes and never
//! re-executed.
//!
//! Entries are write-once: the first response stored for a key is the one
//! every later duplicate receives.  Memory is bounded by a TTL per entry and
//! a soft capacity.  The TTL must exceed the client retry deadline or a late
//! retransmission could execute twice.  Reaching capacity evicts expired
//! entries, oldest first; a live entry is never evicted, so when every entry
//! is live the history grows past its capacity instead.

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, Instant},
};

/// Identity of one request from one client endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub client: SocketAddr,
    pub request_id: i32,
}

impl HistoryKey {
    pub fn new(client: SocketAddr, request_id: i32) -> Self {
        Self { client, request_id }
    }
}

/// Bounds applied to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// How long a reply stays replayable.
    pub ttl: Duration,
    /// Number of stored replies above which expired ones are evicted.
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            capacity: 10_000,
        }
    }
}

/// Hit / miss / eviction counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HistoryStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    reply: Arc<[u8]>,
    expires_at: Instant,
}

struct HistoryInner {
    map: HashMap<HistoryKey, Entry>,
    lru: VecDeque<HistoryKey>,
    config: HistoryConfig,
    stats: HistoryStats,
}

/// Thread-safe reply history with TTL expiry and eviction of expired entries.
#[derive(Clone)]
pub struct ReplyHistory {
    inner: Arc<RwLock<HistoryInner>>,
}

impl ReplyHistory {
    pub fn new() -> Self {
        Self::with_config(HistoryConfig::default())
    }

    pub fn with_config(config: HistoryConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HistoryInner {
                map: HashMap::new(),
                lru: VecDeque::new(),
                config,
                stats: HistoryStats::default(),
            })),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HistoryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> RwLockReadGuard<'_, HistoryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up the stored reply for `key`.
    ///
    /// An expired entry counts as a miss and is removed.
    pub fn get(&self, key: &HistoryKey) -> Option<Arc<[u8]>> {
        let mut inner = self.write();
        let now = Instant::now();

        let found = match inner.map.get(key) {
            Some(entry) if entry.expires_at > now => Some(Arc::clone(&entry.reply)),
            _ => None,
        };

        match found {
            Some(reply) => {
                inner.stats.hits += 1;
                inner.touch(key);
                Some(reply)
            }
            None => {
                inner.stats.misses += 1;
                if inner.map.remove(key).is_some() {
                    inner.lru.retain(|k| k != key);
                }
                None
            }
        }
    }

    /// Store `reply` for `key` unless a live entry already exists.
    ///
    /// Returns the reply that is now authoritative for the key, which is the
    /// earlier one if this call lost a race.
    pub fn insert(&self, key: HistoryKey, reply: Vec<u8>) -> Arc<[u8]> {
        let mut inner = self.write();
        let now = Instant::now();

        if let Some(existing) = inner.map.get(&key) {
            if existing.expires_at > now {
                return Arc::clone(&existing.reply);
            }
        }

        let reply: Arc<[u8]> = Arc::from(reply);
        let expires_at = now + inner.config.ttl;
        inner.insert(
            key,
            Entry {
                reply: Arc::clone(&reply),
                expires_at,
            },
            now,
        );
        reply
    }

    /// Remove expired entries; returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.write();
        let before = inner.map.len();
        inner.map.retain(|_, e| e.expires_at > now);
        let HistoryInner { map, lru, .. } = &mut *inner;
        lru.retain(|k| map.contains_key(k));
        before - inner.map.len()
    }

    pub fn len(&self) -> usize {
        self.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> HistoryStats {
        self.read().stats
    }
}

impl HistoryInner {
    fn insert(&mut self, key: HistoryKey, entry: Entry, now: Instant) {
        if !self.map.contains_key(&key) && self.map.len() >= self.config.capacity {
            self.evict_expired(now);
            if self.map.len() == self.config.capacity {
                log::warn!(
                    "[history] {} live replies at capacity {}; growing past it",
                    self.map.len(),
                    self.config.capacity
                );
            }
        }

        self.lru.retain(|k| k != &key);
        self.lru.push_back(key);
        self.map.insert(key, entry);
    }

    /// Drop expired entries in least-recently-used order.
    fn evict_expired(&mut self, now: Instant) {
        let HistoryInner {
            map, lru, stats, ..
        } = self;
        lru.retain(|k| {
            let expired = !map.get(k).is_some_and(|e| e.expires_at > now);
            if expired && map.remove(k).is_some() {
                stats.evictions += 1;
            }
            !expired
        });
    }

    fn touch(&mut self, key: &HistoryKey) {
        self.lru.retain(|k| k != key);
        self.lru.push_back(*key);
    }
}

impl Default for ReplyHistory {
    fn default() -> Self {
        Self::new()
    }
}
