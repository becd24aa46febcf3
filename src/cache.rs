// ---------------------------------------------------------------------------
// Read-through cache for hot-path entity lookups
// ---------------------------------------------------------------------------
// Keyed by natural identity ("api:customer:v1"). Writers invalidate affected
// keys; `DELETE /api/caches` clears everything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

pub struct CacheManager {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
    ttl: Duration,
}

impl CacheManager {
    pub fn new() -> Arc<Self> {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        })
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(key.to_string(), (value, Instant::now() + self.ttl));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .remove(key);
    }

    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key builders, so every call site agrees on the identity format.
pub mod keys {
    pub fn api(name: &str, version: &str) -> String {
        format!("api:{name}:{version}")
    }

    pub fn endpoint(name: &str, version: &str, method: &str, uri: &str) -> String {
        format!("endpoint:{name}:{version}:{method}:{uri}")
    }

    pub fn user(username: &str) -> String {
        format!("user:{username}")
    }

    pub fn role(role_name: &str) -> String {
        format!("role:{role_name}")
    }

    pub fn group(group_name: &str) -> String {
        format!("group:{group_name}")
    }

    pub fn subscriptions(username: &str) -> String {
        format!("subscriptions:{username}")
    }

    pub fn security_settings() -> String {
        "security:settings".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_invalidate() {
        let cache = CacheManager::new();
        cache.set("api:a:v1", json!({"api_name": "a"}));
        assert_eq!(cache.get("api:a:v1").unwrap()["api_name"], "a");

        cache.invalidate("api:a:v1");
        assert!(cache.get("api:a:v1").is_none());
    }

    #[test]
    fn prefix_invalidation_and_clear() {
        let cache = CacheManager::new();
        cache.set("endpoint:a:v1:GET:/x", json!(1));
        cache.set("endpoint:a:v1:POST:/y", json!(2));
        cache.set("role:admin", json!(3));

        cache.invalidate_prefix("endpoint:a:v1:");
        assert!(cache.get("endpoint:a:v1:GET:/x").is_none());
        assert!(cache.get("role:admin").is_some());

        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = CacheManager::with_ttl(Duration::from_millis(20));
        cache.set("k", json!(1));
        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
    }
}
