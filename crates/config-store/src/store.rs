//! Config fetch engine
//!
//! `ConfigStore` answers config reads from the TTL cache when it can, and
//! otherwise from a single shared network fetch:
//!
//! 1. valid cache entry for the key → return it
//! 2. section requested, document still valid → derive the section from it
//! 3. fetch already in flight → await it and derive
//! 4. otherwise start a fetch under a new generation
//!
//! The fetch itself runs in a spawned task and does its own bookkeeping on
//! completion, so it finishes and updates the cache even if every caller
//! stops waiting. `clear_cache(None)` bumps the generation; a fetch that
//! completes under an older generation only hands its result to the callers
//! already awaiting it.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use transport::Transport;

use crate::cache::{CacheKey, CachedValue, ConfigCache};
use crate::error::{Error, Result};
use crate::sections::ProxyConfig;

/// Cache lifetime shared by the document and every section entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Management API path of the config document.
pub const CONFIG_PATH: &str = "/config";

/// Observable config state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigView {
    pub config: Option<Arc<ProxyConfig>>,
    pub loading: bool,
    pub error: Option<String>,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<ProxyConfig>>>>;

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

struct State {
    cache: ConfigCache,
    generation: u64,
    in_flight: Option<InFlight>,
}

struct StoreShared {
    transport: Arc<dyn Transport>,
    path: String,
    state: Mutex<State>,
    view: watch::Sender<ConfigView>,
}

/// Handle to the config engine. Clones share one cache.
#[derive(Clone)]
pub struct ConfigStore {
    shared: Arc<StoreShared>,
}

fn record(outcome: &'static str) {
    metrics::counter!("console_config_fetches_total", "outcome" => outcome).increment(1);
}

impl ConfigStore {
    pub fn new(transport: Arc<dyn Transport>, ttl: Duration) -> Self {
        let (view, _) = watch::channel(ConfigView::default());
        Self {
            shared: Arc::new(StoreShared {
                transport,
                path: CONFIG_PATH.to_string(),
                state: Mutex::new(State {
                    cache: ConfigCache::new(ttl),
                    generation: 0,
                    in_flight: None,
                }),
                view,
            }),
        }
    }

    /// The whole config document.
    pub async fn fetch_config(&self, force_refresh: bool) -> Result<Arc<ProxyConfig>> {
        let fetch = {
            let mut state = self.shared.state.lock().await;
            if !force_refresh {
                if let Some(config) = state.cache.document(Instant::now()) {
                    record("cache");
                    return Ok(config);
                }
            }
            self.join_or_start(&mut state)
        };
        fetch.await
    }

    /// One section of the config document. `Ok(None)` when the document has
    /// no value for it.
    pub async fn fetch_section(&self, section: &str, force_refresh: bool) -> Result<Option<Value>> {
        let fetch = {
            let mut state = self.shared.state.lock().await;
            if !force_refresh {
                let now = Instant::now();
                let key = CacheKey::Section(section.to_string());
                if let Some(CachedValue::Section(value)) = state.cache.get_valid(&key, now) {
                    record("cache");
                    return Ok(Some(value.clone()));
                }
                if let Some(config) = state.cache.document(now) {
                    record("derived");
                    return Ok(config.section_value(section));
                }
            }
            self.join_or_start(&mut state)
        };
        Ok(fetch.await?.section_value(section))
    }

    fn join_or_start(&self, state: &mut State) -> SharedFetch {
        if let Some(in_flight) = &state.in_flight {
            record("coalesced");
            return in_flight.fetch.clone();
        }

        state.generation += 1;
        let generation = state.generation;
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { shared.run_fetch(generation).await });
        let fetch = async move {
            task.await
                .unwrap_or_else(|e| Err(Error::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            generation,
            fetch: fetch.clone(),
        });
        self.shared.view.send_modify(|view| {
            view.loading = true;
            view.error = None;
        });
        record("network");
        debug!(generation, "fetching config document");
        fetch
    }

    /// Apply a local edit to the live config without re-fetching.
    ///
    /// The section's cache entry and the document entry are dropped, so the
    /// next read goes to the network. A value that does not fit the section's
    /// type is rejected and nothing changes.
    pub async fn update_config_value(&self, section: &str, value: Value) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        let current = self.shared.view.borrow().config.clone();
        let next = current
            .as_deref()
            .cloned()
            .unwrap_or_default()
            .with_section(section, value)?;

        self.shared.view.send_modify(|view| {
            view.config = Some(Arc::new(next));
        });
        state.cache.remove(&CacheKey::Section(section.to_string()));
        state.cache.remove(&CacheKey::Document);
        debug!(section, "config section updated locally");
        Ok(())
    }

    /// Drop cached entries.
    ///
    /// With a section, only that entry and the document entry go. Without
    /// one, everything is cleared, the in-flight fetch is orphaned, and the
    /// observable state resets to empty.
    pub async fn clear_cache(&self, section: Option<&str>) {
        let mut state = self.shared.state.lock().await;
        match section {
            Some(section) => {
                state.cache.remove(&CacheKey::Section(section.to_string()));
                state.cache.remove(&CacheKey::Document);
            }
            None => {
                state.cache.clear();
                state.generation += 1;
                state.in_flight = None;
                self.shared.view.send_replace(ConfigView::default());
                info!(generation = state.generation, "config cache cleared");
            }
        }
    }

    /// Whether the entry for `section` (or the document) is younger than the TTL.
    pub async fn is_cache_valid(&self, section: Option<&str>) -> bool {
        let state = self.shared.state.lock().await;
        state
            .cache
            .is_valid(&CacheKey::for_section(section), Instant::now())
    }

    pub async fn ttl(&self) -> Duration {
        self.shared.state.lock().await.cache.ttl()
    }

    pub fn snapshot(&self) -> ConfigView {
        self.shared.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConfigView> {
        self.shared.view.subscribe()
    }
}

impl StoreShared {
    async fn run_fetch(&self, generation: u64) -> Result<Arc<ProxyConfig>> {
        let result = match self.transport.get(&self.path, &[]).await {
            Ok(document) => ProxyConfig::from_document(document).map(Arc::new),
            Err(e) => Err(e.into()),
        };

        let mut state = self.state.lock().await;
        if state
            .in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation)
        {
            state.in_flight = None;
        }

        if state.generation != generation {
            debug!(
                generation,
                current = state.generation,
                "discarding config fetched for a previous session"
            );
            record("stale");
            return result;
        }

        match &result {
            Ok(config) => {
                state.cache.store_document(Arc::clone(config), Instant::now());
                self.view.send_modify(|view| {
                    view.config = Some(Arc::clone(config));
                    view.loading = false;
                    view.error = None;
                });
                info!(generation, entries = state.cache.len(), "config document cached");
            }
            Err(e) => {
                warn!(generation, error = %e, "config fetch failed");
                record("error");
                self.view.send_modify(|view| {
                    view.loading = false;
                    view.error = Some(e.user_message());
                });
            }
        }
        result
    }
}
