use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::foundation::core::ImageBuf;
use crate::foundation::error::{TesseraError, TesseraResult};
use crate::graph::key::OperationKey;

/// Granularity of cache eviction: a sweep frees down to one step below the ceiling.
pub const CACHE_EVICT_STEP_BYTES: usize = 1024 * 1024;

/// Long-lived host result of a cache-point operation.
#[derive(Clone, Debug)]
pub struct CacheBuffer {
    pub key: OperationKey,
    pub image: Arc<ImageBuf>,
    /// Logical clock value of the last lookup or fill.
    pub last_use: u64,
    pub frame: u64,
}

impl CacheBuffer {
    pub fn bytes(&self) -> usize {
        self.image.byte_len()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub evicted_bytes: u64,
}

/// Byte-bounded LRU of filled cache buffers keyed by [`OperationKey`].
pub struct CacheManager {
    max_bytes: usize,
    tick: u64,
    frame: Option<u64>,
    total_bytes: usize,
    entries: BTreeMap<OperationKey, CacheBuffer>,
    persistent: BTreeSet<OperationKey>,
    stats: CacheStats,
}

impl CacheManager {
    pub fn new(max_bytes: usize) -> TesseraResult<Self> {
        if max_bytes < CACHE_EVICT_STEP_BYTES {
            return Err(TesseraError::validation(format!(
                "cache budget of {max_bytes} bytes is below one eviction step ({CACHE_EVICT_STEP_BYTES})"
            )));
        }
        Ok(Self {
            max_bytes,
            tick: 0,
            frame: None,
            total_bytes: 0,
            entries: BTreeMap::new(),
            persistent: BTreeSet::new(),
            stats: CacheStats::default(),
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Whether a filled entry exists. Does not count as a use.
    pub fn contains(&self, key: &OperationKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_persistent(&self, key: &OperationKey) -> bool {
        self.persistent.contains(key)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Filled entry for `key`, refreshing its last-use time.
    pub fn lookup(&mut self, key: &OperationKey) -> Option<Arc<ImageBuf>> {
        let tick = self.next_tick();
        match self.entries.get_mut(key) {
            Some(e) => {
                e.last_use = tick;
                self.stats.hits += 1;
                Some(Arc::clone(&e.image))
            }
            None => None,
        }
    }

    /// Zeroed storage for a result about to be written for `key`.
    pub fn take_slot(
        &mut self,
        key: &OperationKey,
        width: u32,
        height: u32,
        channels: u32,
    ) -> TesseraResult<Vec<f32>> {
        if self.entries.contains_key(key) {
            return Err(TesseraError::invariant(format!(
                "cache slot requested for already filled key {key}"
            )));
        }
        self.stats.misses += 1;
        Ok(vec![
            0.0;
            (width as usize) * (height as usize) * (channels as usize)
        ])
    }

    /// Store a written result. Persistent entries survive frame changes.
    pub fn fill(&mut self, key: OperationKey, image: ImageBuf, persistent: bool) -> Arc<ImageBuf> {
        let tick = self.next_tick();
        let image = Arc::new(image);
        let entry = CacheBuffer {
            key,
            image: Arc::clone(&image),
            last_use: tick,
            frame: self.frame.unwrap_or(0),
        };
        self.total_bytes += entry.bytes();
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_bytes -= old.bytes();
        }
        if persistent {
            self.persistent.insert(key);
        } else {
            self.persistent.remove(&key);
        }
        image
    }

    fn remove(&mut self, key: &OperationKey) -> Option<CacheBuffer> {
        let e = self.entries.remove(key)?;
        self.total_bytes -= e.bytes();
        self.persistent.remove(key);
        Some(e)
    }

    /// Enforce the byte ceiling.
    ///
    /// When over budget, evicts least recently used entries until usage is at most one step
    /// below the ceiling. The most recently used entry is always kept. Returns evicted keys,
    /// oldest first.
    pub fn check_cache(&mut self) -> Vec<OperationKey> {
        let mut evicted = Vec::new();
        if self.total_bytes <= self.max_bytes {
            return evicted;
        }
        let target = self.max_bytes.saturating_sub(CACHE_EVICT_STEP_BYTES);

        let mut by_age: Vec<(u64, OperationKey)> =
            self.entries.values().map(|e| (e.last_use, e.key)).collect();
        by_age.sort_unstable();

        for (_, key) in by_age {
            if self.total_bytes <= target || self.entries.len() <= 1 {
                break;
            }
            if let Some(e) = self.remove(&key) {
                tracing::debug!(%key, bytes = e.bytes(), last_use = e.last_use, "cache eviction");
                self.stats.evictions += 1;
                self.stats.evicted_bytes += e.bytes() as u64;
                evicted.push(key);
            }
        }
        evicted
    }

    /// Switch to `frame`. Non-persistent entries from another frame are dropped.
    pub fn begin_frame(&mut self, frame: u64) {
        if self.frame == Some(frame) {
            return;
        }
        let stale: Vec<OperationKey> = self
            .entries
            .keys()
            .filter(|k| !self.persistent.contains(*k))
            .copied()
            .collect();
        for key in &stale {
            self.remove(key);
        }
        if !stale.is_empty() {
            tracing::debug!(frame, dropped = stale.len(), "frame change dropped cache entries");
        }
        self.frame = Some(frame);
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.persistent.clear();
        self.total_bytes = 0;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/exec/cache.rs"]
mod tests;
