//! Bounded cache of rendered pages.
//!
//! Entries are keyed by content identity, page and scale, never by session,
//! so every session on the same content shares them. Entries are immutable
//! and handed out behind an `Arc`: evicting one never affects a caller that
//! already holds it.

use lectern_storage::ContentIdentity;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A rasterized page.
#[derive(Debug, PartialEq, Eq)]
pub struct RenderedPage {
    pub content_hash: ContentIdentity,
    pub page: usize,
    /// Hundredths, as used in the cache key.
    pub scale_percent: u32,
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub pixels: Vec<u8>,
}

impl RenderedPage {
    pub fn scale(&self) -> f32 {
        self.scale_percent as f32 / 100.0
    }

    pub(crate) fn cost(&self) -> usize {
        self.pixels.len()
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub(crate) struct RenderKey {
    content_hash: ContentIdentity,
    page: usize,
    scale_percent: u32,
}

impl RenderKey {
    pub(crate) fn new(content_hash: ContentIdentity, page: usize, scale: f32) -> Self {
        Self { content_hash, page, scale_percent: scale_percent(scale) }
    }

    pub(crate) fn scale_percent(&self) -> u32 {
        self.scale_percent
    }
}

/// Scale as an integer number of hundredths, so nearly equal scales share
/// cache entries.
pub(crate) fn scale_percent(scale: f32) -> u32 {
    (scale * 100.0).round() as u32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Pixel bytes currently held.
    pub bytes: usize,
    pub entries: usize,
}

struct Entries {
    pages: LruCache<RenderKey, Arc<RenderedPage>>,
    bytes: usize,
}

pub struct RenderCache {
    entries: Mutex<Entries>,
    budget: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RenderCache {
    /// A cache that holds at most `budget` bytes of pixels.
    pub fn new(budget: usize) -> Self {
        Self {
            entries: Mutex::new(Entries { pages: LruCache::unbounded(), bytes: 0 }),
            budget,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub(crate) fn get(&self, key: &RenderKey) -> Option<Arc<RenderedPage>> {
        let found = self.entries.lock().pages.get(key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store `page`, evicting least recently used entries until it fits.
    /// A page larger than the whole budget is returned but not kept.
    pub(crate) fn insert(&self, key: RenderKey, page: RenderedPage) -> Arc<RenderedPage> {
        let page = Arc::new(page);
        let cost = page.cost();
        if cost > self.budget {
            tracing::debug!(cost, budget = self.budget, "Rendered page exceeds the cache budget; not caching");
            return page;
        }
        let mut entries = self.entries.lock();
        if let Some(previous) = entries.pages.put(key, page.clone()) {
            entries.bytes -= previous.cost();
        }
        entries.bytes += cost;
        while entries.bytes > self.budget {
            let Some((evicted, old)) = entries.pages.pop_lru() else {
                break;
            };
            entries.bytes -= old.cost();
            tracing::debug!(hash = %evicted.content_hash, page = evicted.page, "Evicted rendered page");
        }
        page
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.pages.clear();
        entries.bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bytes: entries.bytes,
            entries: entries.pages.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn hash(n: u8) -> ContentIdentity {
        lectern_storage::identify([n])
    }

    fn page(n: u8, number: usize, bytes: usize) -> (RenderKey, RenderedPage) {
        let key = RenderKey::new(hash(n), number, 1.0);
        let page = RenderedPage {
            content_hash: hash(n),
            page: number,
            scale_percent: 100,
            width: 1,
            height: 1,
            pixels: vec![n; bytes],
        };
        (key, page)
    }

    #[test]
    fn hits_and_misses_are_counted() {
        let cache = RenderCache::new(1024);
        let (key, rendered) = page(1, 1, 16);
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), rendered);
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.pixels, vec![1; 16]);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, bytes: 16, entries: 1 });
    }

    #[test]
    fn least_recently_used_entries_go_first() {
        let cache = RenderCache::new(30);
        let (a, pa) = page(1, 1, 10);
        let (b, pb) = page(1, 2, 10);
        let (c, pc) = page(1, 3, 10);
        let (d, pd) = page(1, 4, 10);
        cache.insert(a.clone(), pa);
        cache.insert(b.clone(), pb);
        cache.insert(c.clone(), pc);
        // Touch `a` so that `b` is now the oldest.
        cache.get(&a).unwrap();
        cache.insert(d.clone(), pd);
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&a).is_some() && cache.get(&c).is_some() && cache.get(&d).is_some());
        assert_eq!(cache.stats().bytes, 30);
    }

    #[test]
    fn evicted_snapshots_stay_valid() {
        let cache = RenderCache::new(10);
        let (a, pa) = page(7, 1, 10);
        let held = cache.insert(a, pa);
        let (b, pb) = page(8, 1, 10);
        cache.insert(b, pb);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(held.pixels, vec![7; 10]);
    }

    #[test]
    fn oversized_pages_are_not_cached() {
        let cache = RenderCache::new(8);
        let (key, rendered) = page(1, 1, 9);
        let returned = cache.insert(key.clone(), rendered);
        assert_eq!(returned.pixels.len(), 9);
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().bytes, 0);
    }

    #[test]
    fn clear_discards_everything() {
        let cache = RenderCache::new(100);
        let (key, rendered) = page(1, 1, 10);
        cache.insert(key, rendered);
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().bytes, 0);
    }

    #[rstest]
    #[case(1.0, 1.0, true)]
    #[case(1.0, 1.001, true)]
    #[case(1.0, 1.5, false)]
    #[case(0.5, 0.25, false)]
    fn keys_compare_by_rounded_scale(#[case] a: f32, #[case] b: f32, #[case] equal: bool) {
        assert_eq!(RenderKey::new(hash(1), 1, a) == RenderKey::new(hash(1), 1, b), equal);
    }
}
