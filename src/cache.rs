use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Small TTL cache for hot read endpoints, a `Mutex<HashMap<K, V>>`
/// shape shared with the rate limiter's own in-memory state. Entries are
/// lazily evicted on lookup; there is no background sweep because the
/// working set is tiny (a handful of list/overview endpoints).
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((value, stored_at)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: K, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, (value, Instant::now()));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// The three hot-read caches, each with its own TTL; bundled together
/// since every HTTP handler that needs one needs them all as shared
/// `State`.
pub struct AppCache {
    pub hosts_list: TtlCache<String, serde_json::Value>,
    pub stats_overview: TtlCache<String, serde_json::Value>,
    pub recent_activity: TtlCache<String, serde_json::Value>,
}

impl Default for AppCache {
    fn default() -> Self {
        AppCache {
            hosts_list: TtlCache::new(Duration::from_secs(10)),
            stats_overview: TtlCache::new(Duration::from_secs(30)),
            recent_activity: TtlCache::new(Duration::from_secs(15)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_value_within_ttl_and_none_after_expiry() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_millis(20));
        cache.set("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn invalidate_removes_entry_immediately() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn app_cache_has_distinct_ttls() {
        let cache = AppCache::default();
        cache.hosts_list.set("k".into(), serde_json::json!([]));
        assert!(cache.hosts_list.get(&"k".to_string()).is_some());
        assert!(cache.stats_overview.get(&"k".to_string()).is_none());
    }
}
