//! Generic TTL cache shared by the resolver and the surrounding CRUD layer.
//!
//! Entries expire lazily on read and via a periodic sweep. Mutations to a
//! known entity kind invalidate a fixed set of key prefixes, declared in
//! one table below rather than scattered through call sites.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Time source seam so expiry is testable without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Entity kinds whose mutations touch cached reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    CatalogItem,
    Embedding,
    Conversation,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// The invalidation table: which key prefixes a mutation of each entity
/// kind makes stale. Every operation on a kind invalidates the same set;
/// a message mutation also touches conversation-list entries because list
/// metadata (last message, counts) changes with it.
pub fn invalidated_prefixes(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::CatalogItem => &["catalog:", "rec:"],
        EntityKind::Embedding => &["rec:"],
        EntityKind::Conversation => &["conversation:"],
        EntityKind::Message => &["message:", "conversation:"],
    }
}

struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}

#[derive(Clone)]
pub struct TtlCache<T> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<T>>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<T: Clone + Send + Sync + 'static> TtlCache<T> {
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
            clock,
        }
    }

    /// Fetch a live entry. An expired entry is logically absent and gets
    /// dropped on the spot.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();

        let expired = {
            let entries = self.entries.read().ok()?;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            if let Ok(mut entries) = self.entries.write() {
                entries.remove(key);
            }
        }
        None
    }

    pub fn set(&self, key: impl Into<String>, value: T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: T, ttl: Duration) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key.into(),
                CacheEntry {
                    value,
                    stored_at: self.clock.now(),
                    ttl,
                },
            );
        }
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many
    /// were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Invalidated {} cache entries under prefix '{}'", removed, prefix);
        }
        removed
    }

    /// Apply the invalidation table for one mutation.
    pub fn invalidate_on_mutation(&self, kind: EntityKind, operation: Operation) -> usize {
        let removed: usize = invalidated_prefixes(kind)
            .iter()
            .map(|prefix| self.invalidate_prefix(prefix))
            .sum();
        info!(
            "Mutation {:?} on {:?} invalidated {} cache entries",
            operation, kind, removed
        );
        removed
    }

    /// Remove every expired entry. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let Ok(entries) = self.entries.read() else {
            return CacheStats {
                total_entries: 0,
                valid_entries: 0,
                expired_entries: 0,
            };
        };
        let valid = entries.values().filter(|e| !e.is_expired(now)).count();
        CacheStats {
            total_entries: entries.len(),
            valid_entries: valid,
            expired_entries: entries.len() - valid,
        }
    }

    /// Periodic background eviction alongside the lazy expiry on read.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!("Cache sweep evicted {} expired entries", evicted);
                }
            }
        })
    }
}
