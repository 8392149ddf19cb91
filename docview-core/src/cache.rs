use std::collections::HashMap;

use tracing::debug;

use crate::bitmap::Disposable;
use crate::types::{PageNumber, Rotation};

pub const DEFAULT_CACHE_CAPACITY: usize = 5;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub page: PageNumber,
    scale_milli: u32,
    pub rotation: Rotation,
}

impl CacheKey {
    pub fn new(page: PageNumber, scale: f32, rotation: Rotation) -> Self {
        Self {
            page,
            scale_milli: quantize_scale(scale),
            rotation,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale_milli as f32 / 1000.0
    }

    fn distance(&self, reference_page: PageNumber) -> usize {
        self.page.abs_diff(reference_page)
    }
}

fn quantize_scale(scale: f32) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub resident_bytes: usize,
}

struct CacheEntry<S> {
    surface: S,
    size_bytes: usize,
    sequence: u64,
}

pub struct RenderCache<S: Disposable> {
    entries: HashMap<CacheKey, CacheEntry<S>>,
    capacity: usize,
    sequence: u64,
    stats: CacheStats,
}

impl<S: Disposable> RenderCache<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            sequence: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
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

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.keys().copied().collect()
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<&S> {
        match self.entries.get(key) {
            Some(entry) => {
                self.stats.hits += 1;
                Some(&entry.surface)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn peek(&self, key: &CacheKey) -> Option<&S> {
        self.entries.get(key).map(|entry| &entry.surface)
    }

    pub fn put(&mut self, key: CacheKey, surface: S) {
        self.sequence += 1;
        let size_bytes = surface.size_bytes();
        let entry = CacheEntry {
            surface,
            size_bytes,
            sequence: self.sequence,
        };
        self.stats.resident_bytes += size_bytes;
        if let Some(mut previous) = self.entries.insert(key, entry) {
            self.stats.resident_bytes = self
                .stats
                .resident_bytes
                .saturating_sub(previous.size_bytes);
            previous.surface.dispose();
        }
    }

    /// Evicts entries until the cache fits its capacity or only the current
    /// page and its neighbours remain. Returns the evicted keys.
    pub fn evict_if_over_capacity(&mut self, current_page: PageNumber) -> Vec<CacheKey> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(key, _)| key.distance(current_page) > 1)
                .max_by(|(a_key, a), (b_key, b)| {
                    a_key
                        .distance(current_page)
                        .cmp(&b_key.distance(current_page))
                        .then(b.sequence.cmp(&a.sequence))
                })
                .map(|(key, _)| *key);

            let Some(key) = victim else {
                break;
            };
            self.remove(&key);
            self.stats.evictions += 1;
            evicted.push(key);
        }
        if !evicted.is_empty() {
            debug!(
                current_page,
                evicted = evicted.len(),
                resident = self.entries.len(),
                "evicted cached renders"
            );
        }
        evicted
    }

    pub fn invalidate_page(&mut self, page: PageNumber) -> usize {
        let keys: Vec<_> = self
            .entries
            .keys()
            .filter(|key| key.page == page)
            .copied()
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn clear(&mut self) {
        for (_, mut entry) in self.entries.drain() {
            entry.surface.dispose();
        }
        self.stats.resident_bytes = 0;
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(mut entry) = self.entries.remove(key) {
            self.stats.resident_bytes = self.stats.resident_bytes.saturating_sub(entry.size_bytes);
            entry.surface.dispose();
        }
    }
}

impl<S: Disposable> Drop for RenderCache<S> {
    fn drop(&mut self) {
        self.clear();
    }
}
