use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// How long the home page body stays cached. Expiry is the only
/// invalidation, so a fresh post can be invisible on `/` for up to this
/// long.
pub const HOME_CACHE_TTL: Duration = Duration::from_secs(20);

/// Time-boxed full-response cache (process local), keyed by query string.
#[derive(Clone)]
pub struct PageCache {
    store: Arc<DashMap<String, (Instant, Vec<u8>)>>,
    ttl: Duration,
}

impl PageCache {
    pub fn new(ttl: Duration) -> Self {
        Self { store: Arc::new(DashMap::new()), ttl }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(entry) = self.store.get(key) {
            let (stored_at, body) = entry.value();
            if stored_at.elapsed() < self.ttl {
                return Some(body.clone());
            }
        }
        // expired or absent; drop any stale entry on the way out
        self.store.remove(key);
        None
    }

    pub fn put(&self, key: String, body: Vec<u8>) {
        self.store.insert(key, (Instant::now(), body));
    }

    pub fn clear(&self) {
        self.store.clear();
    }
}
