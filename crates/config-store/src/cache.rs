//! TTL cache for the config document and its sections
//!
//! One entry for the whole document plus one per known section. Entries are
//! replaced, never mutated. Validity is `now - captured_at < ttl`; an entry
//! exactly `ttl` old is already stale. Stale entries stay in the map until
//! replaced or cleared so the store can still tell what it last saw.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::time::{Duration, Instant};

use crate::sections::{ProxyConfig, section_keys};

/// Cache slot: the whole document or one named section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Document,
    Section(String),
}

impl CacheKey {
    /// `None` addresses the whole document.
    pub fn for_section(section: Option<&str>) -> Self {
        match section {
            Some(section) => CacheKey::Section(section.to_string()),
            None => CacheKey::Document,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Document(Arc<ProxyConfig>),
    Section(Value),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: CachedValue,
    captured_at: Instant,
}

#[derive(Debug)]
pub struct ConfigCache {
    entries: HashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl ConfigCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry for `key` if it is younger than the TTL.
    pub fn get_valid(&self, key: &CacheKey, now: Instant) -> Option<&CachedValue> {
        self.entries
            .get(key)
            .filter(|entry| now.saturating_duration_since(entry.captured_at) < self.ttl)
            .map(|entry| &entry.data)
    }

    pub fn is_valid(&self, key: &CacheKey, now: Instant) -> bool {
        self.get_valid(key, now).is_some()
    }

    /// Valid cached document, if any.
    pub fn document(&self, now: Instant) -> Option<Arc<ProxyConfig>> {
        match self.get_valid(&CacheKey::Document, now)? {
            CachedValue::Document(config) => Some(config.clone()),
            CachedValue::Section(_) => None,
        }
    }

    /// Replace the document entry and every section entry derived from it,
    /// all stamped `captured_at`. Known sections missing from `config` lose
    /// their entry.
    pub fn store_document(&mut self, config: Arc<ProxyConfig>, captured_at: Instant) {
        for key in section_keys() {
            let cache_key = CacheKey::Section(key.to_string());
            match config.section_value(key) {
                Some(value) => {
                    self.entries.insert(
                        cache_key,
                        CacheEntry {
                            data: CachedValue::Section(value),
                            captured_at,
                        },
                    );
                }
                None => {
                    self.entries.remove(&cache_key);
                }
            }
        }
        self.entries.insert(
            CacheKey::Document,
            CacheEntry {
                data: CachedValue::Document(config),
                captured_at,
            },
        );
    }

    pub fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn captured_at(&self, key: &CacheKey) -> Option<Instant> {
        self.entries.get(key).map(|e| e.captured_at)
    }
}
