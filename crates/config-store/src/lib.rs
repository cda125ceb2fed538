//! Gateway configuration fetch and cache
//!
//! Fetches the management API's `/config` document, keeps it (whole and per
//! section) in a TTL cache, and collapses concurrent fetches into a single
//! request. `clear_cache(None)` starts a new generation; a fetch that lands
//! after that is handed to its own awaiters but never written back.

pub mod cache;
pub mod error;
pub mod sections;
pub mod store;

pub use cache::{CacheKey, CachedValue, ConfigCache};
pub use error::{Error, Result};
pub use sections::{ProxyConfig, QuotaExceededConfig, SECTIONS, SectionBinding};
pub use store::{CONFIG_PATH, ConfigStore, ConfigView, DEFAULT_CACHE_TTL};
