use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Time-to-live response cache. Expired entries are dropped when read.
#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// The stored value if it has not expired. An expired entry is removed.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if Instant::now() < entry.expires_at {
            return Some(entry.value.clone());
        }
        entries.remove(key);
        None
    }

    /// Store `value` with a fresh expiry.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().insert(key.into(), entry);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.lock().remove(key).map(|e| e.value)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop every expired entry; returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }

    /// Entries held, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn hit_before_ttl_miss_after() {
        let cache = ResponseCache::new(Duration::from_secs(5));
        cache.insert("GET_GUILD:{}", json!({"id": 1}));

        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert_eq!(cache.get("GET_GUILD:{}"), Some(json!({"id": 1})));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("GET_GUILD:{}"), None);
        assert!(cache.is_empty(), "expired entry removed on read");
    }

    #[tokio::test(start_paused = true)]
    async fn rewrite_refreshes_expiry() {
        let cache = ResponseCache::new(Duration::from_secs(5));
        cache.insert("k", json!(1));
        tokio::time::advance(Duration::from_secs(4)).await;
        cache.insert("k", json!(2));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get("k"), Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_and_clear() {
        let cache = ResponseCache::new(Duration::from_secs(1));
        cache.insert("old", json!(null));
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.insert("new", json!(true));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.remove("new"), Some(json!(true)));

        cache.insert("x", json!(1));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = ResponseCache::new(Duration::from_secs(1));
        assert_eq!(cache.get("nope"), None);
        assert_eq!(cache.ttl(), Duration::from_secs(1));
    }
}
