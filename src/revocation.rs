// ---------------------------------------------------------------------------
// Revocation ledger — per-user timed heap of invalidated token ids
// ---------------------------------------------------------------------------
// Entries expire with the token they revoke, so the heap purges itself both
// lazily (on every check) and via the periodic sweeper. In external mode the
// ledger is mirrored into Redis so every worker sees a revocation; the local
// heap remains the fallback during a redis outage window.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::chaos::ChaosState;

#[derive(Default)]
struct Inner {
    /// username -> min-heap of (expiry, token_id)
    revoked: HashMap<String, BinaryHeap<Reverse<(i64, String)>>>,
    /// username -> outstanding (token_id, expiry) pairs for revoke-all
    issued: HashMap<String, Vec<(String, i64)>>,
}

pub struct RevocationLedger {
    inner: Mutex<Inner>,
    redis: Option<ConnectionManager>,
    chaos: Arc<ChaosState>,
}

impl RevocationLedger {
    pub fn new(chaos: Arc<ChaosState>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            redis: None,
            chaos,
        })
    }

    pub fn with_redis(chaos: Arc<ChaosState>, manager: ConnectionManager) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            redis: Some(manager),
            chaos,
        })
    }

    fn redis_usable(&self) -> Option<ConnectionManager> {
        let manager = self.redis.clone()?;
        if self.chaos.should_fail("redis") {
            self.chaos.burn("redis");
            return None;
        }
        Some(manager)
    }

    /// Track a freshly issued token so admin revoke-for-user can find it.
    pub fn note_issued(&self, username: &str, token_id: &str, expiry: i64) {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let now = chrono::Utc::now().timestamp();
        let issued = inner.issued.entry(username.to_string()).or_default();
        issued.retain(|(_, exp)| *exp > now);
        issued.push((token_id.to_string(), expiry));
    }

    pub async fn revoke(&self, username: &str, token_id: &str, expiry: i64) {
        {
            let mut inner = self.inner.lock().expect("ledger lock poisoned");
            inner
                .revoked
                .entry(username.to_string())
                .or_default()
                .push(Reverse((expiry, token_id.to_string())));
        }
        if let Some(mut conn) = self.redis_usable() {
            use redis::AsyncCommands;
            let key = format!("doorman:revoked:{username}:{token_id}");
            let ttl = (expiry - chrono::Utc::now().timestamp()).max(1) as u64;
            let result: redis::RedisResult<()> = conn.set_ex(&key, 1, ttl).await;
            if let Err(e) = result {
                tracing::warn!("ledger: redis revoke write failed: {}", e);
            }
        }
        tracing::info!("ledger: revoked token for user={}", username);
    }

    /// Revoke every outstanding token id for a username. Returns how many
    /// were added to the ledger.
    pub async fn revoke_all_for(&self, username: &str) -> usize {
        let outstanding: Vec<(String, i64)> = {
            let inner = self.inner.lock().expect("ledger lock poisoned");
            inner.issued.get(username).cloned().unwrap_or_default()
        };
        for (token_id, expiry) in &outstanding {
            self.revoke(username, token_id, *expiry).await;
        }
        outstanding.len()
    }

    pub async fn is_revoked(&self, username: &str, token_id: &str) -> bool {
        let now = chrono::Utc::now().timestamp();
        {
            let mut inner = self.inner.lock().expect("ledger lock poisoned");
            if let Some(heap) = inner.revoked.get_mut(username) {
                purge_heap(heap, now);
                if heap.iter().any(|Reverse((_, jti))| jti == token_id) {
                    return true;
                }
            }
        }
        if let Some(mut conn) = self.redis_usable() {
            use redis::AsyncCommands;
            let key = format!("doorman:revoked:{username}:{token_id}");
            let result: redis::RedisResult<bool> = conn.exists(&key).await;
            match result {
                Ok(found) => return found,
                Err(e) => tracing::warn!("ledger: redis revoke read failed: {}", e),
            }
        }
        false
    }

    /// Drop every past-expiry entry; empty per-user heaps disappear.
    pub fn purge_expired(&self) {
        let now = chrono::Utc::now().timestamp();
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        for heap in inner.revoked.values_mut() {
            purge_heap(heap, now);
        }
        inner.revoked.retain(|_, heap| !heap.is_empty());
        for issued in inner.issued.values_mut() {
            issued.retain(|(_, exp)| *exp > now);
        }
        inner.issued.retain(|_, issued| !issued.is_empty());
    }

    /// Periodic sweep so abandoned entries cannot accumulate between checks.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                ledger.purge_expired();
            }
        })
    }
}

fn purge_heap(heap: &mut BinaryHeap<Reverse<(i64, String)>>, now: i64) {
    while let Some(Reverse((expiry, _))) = heap.peek() {
        if *expiry <= now {
            heap.pop();
        } else {
            break;
        }
    }
}
