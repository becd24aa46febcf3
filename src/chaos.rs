// ---------------------------------------------------------------------------
// Chaos substrate — injectable backend outage simulation
// ---------------------------------------------------------------------------
// A toggled backend fails fast instead of blocking; every fail-fast burns the
// error budget counter. Timers auto-clear windows opened with `duration_ms`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

#[derive(Default)]
struct ChaosInner {
    redis_outage: bool,
    mongo_outage: bool,
    error_budget_burn: u64,
}

pub struct ChaosState {
    inner: Mutex<ChaosInner>,
}

impl ChaosState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ChaosInner::default()),
        })
    }

    fn normalize(backend: &str) -> Option<&'static str> {
        match backend.trim().to_lowercase().as_str() {
            "redis" => Some("redis"),
            "mongo" | "mongodb" => Some("mongo"),
            _ => None,
        }
    }

    /// Flip an outage toggle. Returns false for unknown backends.
    pub fn set(&self, backend: &str, enabled: bool) -> bool {
        let Some(key) = Self::normalize(backend) else {
            return false;
        };
        let mut inner = self.inner.lock().expect("chaos lock poisoned");
        match key {
            "redis" => inner.redis_outage = enabled,
            _ => inner.mongo_outage = enabled,
        }
        tracing::warn!("chaos: {} outage set to {}", key, enabled);
        true
    }

    /// Enable an outage window that auto-clears after `duration_ms`.
    pub fn enable_for(self: &Arc<Self>, backend: &str, duration_ms: u64) -> bool {
        if !self.set(backend, true) {
            return false;
        }
        let state = Arc::clone(self);
        let backend = backend.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
            state.set(&backend, false);
        });
        true
    }

    pub fn should_fail(&self, backend: &str) -> bool {
        let Some(key) = Self::normalize(backend) else {
            return false;
        };
        let inner = self.inner.lock().expect("chaos lock poisoned");
        match key {
            "redis" => inner.redis_outage,
            _ => inner.mongo_outage,
        }
    }

    /// Record a fail-fast against a disabled backend.
    pub fn burn(&self, backend: &str) {
        let mut inner = self.inner.lock().expect("chaos lock poisoned");
        inner.error_budget_burn += 1;
        tracing::warn!(
            "chaos: error_budget_burn+1 backend={} total={}",
            backend,
            inner.error_budget_burn
        );
    }

    pub fn stats(&self) -> Value {
        let inner = self.inner.lock().expect("chaos lock poisoned");
        json!({
            "redis_outage": inner.redis_outage,
            "mongo_outage": inner.mongo_outage,
            "error_budget_burn": inner.error_budget_burn,
        })
    }

    /// Backend health pair `(mongo_ok, redis_ok)` for readiness probes.
    pub fn healthy(&self) -> (bool, bool) {
        let inner = self.inner.lock().expect("chaos lock poisoned");
        (!inner.mongo_outage, !inner.redis_outage)
    }
}
