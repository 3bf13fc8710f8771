use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tagfs_lib::{Item, ItemId};

/// Process-wide invalidation generation. Every mutation bumps it; every
/// cache read compares against it and drops stale contents.
#[derive(Debug, Default)]
pub struct CacheStamp {
    generation: AtomicU64,
}

impl CacheStamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Present(Item),
    Missing,
}

/// Per-directory listing cache: name (or decimal id) to item, with a
/// missing sentinel so repeated negative lookups skip the database.
#[derive(Debug)]
pub struct ListingCache {
    generation: u64,
    entries: HashMap<String, CacheEntry>,
    log: bool,
    hits: u64,
    misses: u64,
}

impl ListingCache {
    pub fn new(stamp: &CacheStamp, log: bool) -> Self {
        Self {
            generation: stamp.current(),
            entries: HashMap::new(),
            log,
            hits: 0,
            misses: 0,
        }
    }

    fn ensure_valid(&mut self, stamp: &CacheStamp) {
        let current = stamp.current();
        if self.generation < current {
            if self.log {
                debug!("cache reset at generation {}", current);
            }
            self.entries.clear();
            self.generation = current;
        }
    }

    /// `None` means unknown, `Some(None)` a cached negative result,
    /// `Some(Some(item))` a cached hit.
    pub fn get(&mut self, stamp: &CacheStamp, name: &str) -> Option<Option<Item>> {
        self.ensure_valid(stamp);
        let result = self.entries.get(name);
        if self.log {
            match result {
                Some(_) => {
                    self.hits += 1;
                    debug!("cache hit ({:.2}% miss)", self.miss_ratio());
                }
                None => {
                    self.misses += 1;
                    debug!("cache miss ({:.2}% miss)", self.miss_ratio());
                }
            }
        }
        match result {
            Some(CacheEntry::Present(item)) => Some(Some(item.clone())),
            Some(CacheEntry::Missing) => Some(None),
            None => None,
        }
    }

    pub fn get_by_id(&mut self, stamp: &CacheStamp, id: ItemId) -> Option<Option<Item>> {
        self.get(stamp, &id.to_string())
    }

    pub fn put(&mut self, stamp: &CacheStamp, name: &str, item: Item) {
        self.ensure_valid(stamp);
        self.entries.insert(name.to_string(), CacheEntry::Present(item));
    }

    pub fn put_by_id(&mut self, stamp: &CacheStamp, id: ItemId, item: Item) {
        self.put(stamp, &id.to_string(), item);
    }

    pub fn put_missing(&mut self, stamp: &CacheStamp, name: &str) {
        self.ensure_valid(stamp);
        self.entries.insert(name.to_string(), CacheEntry::Missing);
    }

    pub fn put_missing_by_id(&mut self, stamp: &CacheStamp, id: ItemId) {
        self.put_missing(stamp, &id.to_string());
    }

    fn miss_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.misses as f64 * 100.0 / total as f64
        }
    }
}
