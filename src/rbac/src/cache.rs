//! LRU decision cache with single-flight computation
//!
//! Decisions are keyed by a [`Fingerprint`], a BLAKE3 digest of the fully
//! bound request. The cache provides:
//!
//! - a bounded LRU with optional TTL expiration
//! - single-flight: concurrent misses on one fingerprint share one computation
//! - a generation counter so a computation racing an [`invalidate`] never
//!   installs its result
//!
//! [`invalidate`]: DecisionCache::invalidate

use crate::config::CacheConfig;
use crate::error::{RbacError, Result};
use crate::types::{Decision, EnforceRequest};
use blake3::Hasher;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::debug;

/// BLAKE3 digest of an enforcement request
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a request.
    ///
    /// Every field is length-prefixed so adjacent fields can not alias, and
    /// context entries are hashed in key order.
    pub fn of(request: &EnforceRequest) -> Self {
        let mut hasher = Hasher::new();

        update_field(&mut hasher, &request.subject);
        update_field(&mut hasher, &request.object);
        update_field(&mut hasher, &request.action);

        match &request.domain {
            Some(domain) => {
                hasher.update(&[1]);
                update_field(&mut hasher, domain);
            }
            None => {
                hasher.update(&[0]);
            }
        }

        let mut context: Vec<_> = request.context.iter().collect();
        context.sort_by_key(|(k, _)| *k);
        hasher.update(&(context.len() as u64).to_le_bytes());
        for (k, v) in context {
            update_field(&mut hasher, k);
            update_field(&mut hasher, v);
        }

        Self(*hasher.finalize().as_bytes())
    }

    /// Fingerprint an arbitrary ordered list of fields
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Self {
        let mut hasher = Hasher::new();
        for field in fields {
            update_field(&mut hasher, field.as_ref());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

fn update_field(hasher: &mut Hasher, field: &str) {
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

/// Cached entry with insertion time
#[derive(Clone)]
struct CachedEntry {
    decision: Decision,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(decision: Decision) -> Self {
        Self {
            decision,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.map_or(false, |ttl| self.cached_at.elapsed() >= ttl)
    }
}

/// Bounded decision cache
pub struct DecisionCache {
    /// LRU entries
    entries: Mutex<LruCache<Fingerprint, CachedEntry>>,

    /// Computations in progress, one per fingerprint
    inflight: DashMap<Fingerprint, Arc<OnceCell<Decision>>>,

    /// Bumped by every global invalidation
    generation: AtomicU64,

    /// Cache configuration
    config: CacheConfig,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    computations: AtomicU64,
}

impl DecisionCache {
    /// Create a new decision cache
    ///
    /// # Errors
    ///
    /// Returns [`RbacError::Capacity`] if the configured capacity is zero.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(config.capacity).ok_or(RbacError::Capacity(config.capacity))?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            inflight: DashMap::new(),
            generation: AtomicU64::new(0),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        })
    }

    /// Get a cached decision, refreshing its recency
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Decision> {
        let mut entries = self.entries.lock();

        let expired = match entries.get(fingerprint) {
            Some(entry) if !entry.is_expired(self.config.ttl()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.decision.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(fingerprint);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a decision
    pub fn set(&self, fingerprint: Fingerprint, decision: Decision) {
        let mut entries = self.entries.lock();
        self.insert_locked(&mut entries, fingerprint, decision);
    }

    /// Drop every cached decision.
    ///
    /// Computations already running finish for their callers but do not
    /// install their results.
    pub fn invalidate(&self) {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let dropped = entries.len();
        entries.clear();
        self.inflight.clear();
        drop(entries);

        debug!("Invalidated decision cache ({} entries)", dropped);
    }

    /// Drop one cached decision. Returns true if it was present.
    ///
    /// A computation already running for the fingerprint finishes for its
    /// callers but does not install its result.
    pub fn invalidate_key(&self, fingerprint: &Fingerprint) -> bool {
        self.inflight.remove(fingerprint);
        self.entries.lock().pop(fingerprint).is_some()
    }

    /// Return the cached decision or compute it once for all concurrent callers.
    ///
    /// If the computation fails, its error goes to the caller that ran it and
    /// nothing is cached; a caller waiting on the same fingerprint then runs
    /// its own computation.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: Fingerprint, compute: F) -> Result<Decision>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Decision>>,
    {
        if let Some(decision) = self.get(&fingerprint) {
            return Ok(decision);
        }

        let cell = self
            .inflight
            .entry(fingerprint)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let flight = Arc::clone(&cell);
        let result = cell
            .get_or_try_init(|| async move {
                // A flight that finished since our miss already stored the answer
                if let Some(decision) = self.peek(&fingerprint) {
                    return Ok(decision);
                }

                let generation = self.generation.load(Ordering::Acquire);
                self.computations.fetch_add(1, Ordering::Relaxed);

                let decision = compute().await?;
                self.set_if_current(fingerprint, decision.clone(), generation, &flight);
                Ok(decision)
            })
            .await
            .map(Clone::clone);

        self.inflight
            .remove_if(&fingerprint, |_, current| Arc::ptr_eq(current, &cell));

        result
    }

    /// Number of cached decisions
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.config.capacity,
        }
    }

    fn peek(&self, fingerprint: &Fingerprint) -> Option<Decision> {
        self.entries
            .lock()
            .peek(fingerprint)
            .filter(|entry| !entry.is_expired(self.config.ttl()))
            .map(|entry| entry.decision.clone())
    }

    /// Install a computed decision unless an invalidation happened since the
    /// computation started. Point invalidation detaches the flight's cell.
    fn set_if_current(
        &self,
        fingerprint: Fingerprint,
        decision: Decision,
        generation: u64,
        flight: &Arc<OnceCell<Decision>>,
    ) {
        let mut entries = self.entries.lock();
        let attached = self
            .inflight
            .get(&fingerprint)
            .map_or(false, |current| Arc::ptr_eq(current.value(), flight));
        if self.generation.load(Ordering::Acquire) != generation || !attached {
            debug!("Discarding stale decision for {}", fingerprint);
            return;
        }
        self.insert_locked(&mut entries, fingerprint, decision);
    }

    fn insert_locked(
        &self,
        entries: &mut LruCache<Fingerprint, CachedEntry>,
        fingerprint: Fingerprint,
        decision: Decision,
    ) {
        if let Some((evicted, _)) = entries.push(fingerprint, CachedEntry::new(decision)) {
            if evicted != fingerprint {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub computations: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
