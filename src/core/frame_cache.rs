//! Frame cache: composited results keyed by scope, frame, size and layer.
//!
//! One cache serves every pipeline layer (raw decode, preprocessed,
//! per-strip composite, per-level final) so partial invalidation can reuse
//! upstream work. Eviction is LRU under a byte budget via the `lru` crate;
//! the most recently stored final-output entry is protected so single-frame
//! scrubbing never loses the frame on screen.
//!
//! Writes are idempotent: buffers are immutable and last-writer-wins, so two
//! redundant evaluations racing to populate the same key are harmless.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::debug;
use lru::LruCache;

use crate::config::DEFAULT_CACHE_BYTES;
use crate::entities::frame::ImageBuffer;
use crate::entities::strip::StripId;

/// What a cached buffer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// One strip's own output.
    Strip(StripId),
    /// A whole timeline level's composite; `None` is the root level,
    /// `Some(id)` the inside of that meta strip.
    Level(Option<StripId>),
}

/// Pipeline stage the buffer was captured at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheLayer {
    Raw,
    Preprocessed,
    Composited,
    Final,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub scope: CacheScope,
    pub frame: i64,
    pub size: (usize, usize),
    /// 0 = topmost-visible query; >0 = a specific channel was requested.
    pub channel_filter: i32,
    pub layer: CacheLayer,
}

/// Hit/miss/churn counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn insertions(&self) -> u64 {
        self.insertions.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

struct CacheInner {
    entries: LruCache<FrameKey, ImageBuffer>,
    /// Most recent final-output key; survives eviction pressure.
    protected: Option<FrameKey>,
}

/// Byte-budgeted LRU over [`FrameKey`]s.
pub struct FrameCache {
    inner: Mutex<CacheInner>,
    mem_used: AtomicUsize,
    capacity: AtomicUsize,
    stats: CacheStats,
}

impl FrameCache {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                protected: None,
            }),
            mem_used: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity_bytes.max(1)),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&self, key: &FrameKey) -> Option<ImageBuffer> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let hit = inner.entries.get(key).cloned();
        if hit.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Store a buffer. Replacing an existing entry is fine (idempotent
    /// writes); a `Final` key becomes the new protected entry.
    pub fn put(&self, key: FrameKey, buffer: ImageBuffer) {
        let size = buffer.mem();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(old) = inner.entries.put(key, buffer) {
            self.mem_used.fetch_sub(old.mem(), Ordering::Relaxed);
        }
        self.mem_used.fetch_add(size, Ordering::Relaxed);
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);
        if key.layer == CacheLayer::Final {
            inner.protected = Some(key);
        }

        self.evict_over_budget(&mut inner);
    }

    fn evict_over_budget(&self, inner: &mut CacheInner) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        while self.mem_used.load(Ordering::Relaxed) > capacity {
            let Some((key, buf)) = inner.entries.pop_lru() else {
                break;
            };
            if inner.protected == Some(key) {
                // Keep the on-screen frame; push it back as most recent.
                // If it is the only entry left, stop evicting.
                let len_before = inner.entries.len();
                inner.entries.put(key, buf);
                if len_before == 0 {
                    break;
                }
                continue;
            }
            self.mem_used.fetch_sub(buf.mem(), Ordering::Relaxed);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("frame cache: evicted {:?} ({} bytes)", key, buf.mem());
        }
    }

    /// Drop every entry whose key matches the predicate.
    pub fn invalidate_where(&self, pred: impl Fn(&FrameKey) -> bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let doomed: Vec<FrameKey> = inner
            .entries
            .iter()
            .filter(|(k, _)| pred(k))
            .map(|(k, _)| *k)
            .collect();
        for key in &doomed {
            if let Some(buf) = inner.entries.pop(key) {
                self.mem_used.fetch_sub(buf.mem(), Ordering::Relaxed);
            }
            if inner.protected == Some(*key) {
                inner.protected = None;
            }
        }
        if !doomed.is_empty() {
            debug!("frame cache: invalidated {} entries", doomed.len());
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
        inner.protected = None;
        self.mem_used.store(0, Ordering::Relaxed);
        debug!("frame cache: cleared");
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mem_used(&self) -> usize {
        self.mem_used.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Change the byte budget, evicting immediately if now over.
    pub fn set_capacity(&self, capacity_bytes: usize) {
        self.capacity.store(capacity_bytes.max(1), Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_over_budget(&mut inner);
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl std::fmt::Debug for FrameCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCache")
            .field("entries", &self.len())
            .field("mem_used", &self.mem_used())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}
