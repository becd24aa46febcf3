// ---------------------------------------------------------------------------
// Window counters + login throttle
// ---------------------------------------------------------------------------
// Fixed-window counters behind one abstraction: an in-memory map with
// per-key expiry (fallback, single worker) and Redis INCR/EXPIRE
// (authoritative across workers). During a redis outage window the counter
// fails over to the memory map instead of blocking the request path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;

use crate::chaos::ChaosState;

struct MemoryCounter {
    entries: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryCounter {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn incr(&self, key: &str, window: Duration) -> (u64, u64) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("counter lock poisoned");
        entries.retain(|_, (_, window_end)| *window_end > now);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| (0, now + window));
        entry.0 += 1;
        let reset_in = entry.1.saturating_duration_since(now).as_secs().max(1);
        (entry.0, reset_in)
    }
}

pub struct WindowCounter {
    memory: MemoryCounter,
    redis: Option<ConnectionManager>,
    chaos: Arc<ChaosState>,
}

impl WindowCounter {
    pub fn memory(chaos: Arc<ChaosState>) -> Arc<Self> {
        Arc::new(Self {
            memory: MemoryCounter::new(),
            redis: None,
            chaos,
        })
    }

    pub fn with_redis(chaos: Arc<ChaosState>, manager: ConnectionManager) -> Arc<Self> {
        Arc::new(Self {
            memory: MemoryCounter::new(),
            redis: Some(manager),
            chaos,
        })
    }

    /// Count a hit against `key` inside a fixed window. Returns the running
    /// count and seconds until the window resets.
    pub async fn incr(&self, key: &str, window_secs: u64) -> (u64, u64) {
        let window = Duration::from_secs(window_secs.max(1));

        if let Some(manager) = &self.redis {
            if self.chaos.should_fail("redis") {
                self.chaos.burn("redis");
            } else {
                match Self::incr_redis(manager.clone(), key, window_secs).await {
                    Ok(result) => return result,
                    Err(e) => tracing::warn!("rate-limit: redis counter failed: {}", e),
                }
            }
        }

        self.memory.incr(key, window)
    }

    async fn incr_redis(
        mut conn: ConnectionManager,
        key: &str,
        window_secs: u64,
    ) -> redis::RedisResult<(u64, u64)> {
        use redis::AsyncCommands;
        let key = format!("doorman:rl:{key}");
        let count: u64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: bool = conn.expire(&key, window_secs.max(1) as i64).await?;
        }
        let ttl: i64 = conn.ttl(&key).await?;
        Ok((count, ttl.max(1) as u64))
    }
}

/// Over-quota outcome with everything the retry headers need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub limit: u64,
    pub remaining: u64,
    pub reset_in: u64,
}

/// Fixed-window check: `Ok` while within the limit, `Err(quota)` once over.
pub async fn check_window(
    counter: &WindowCounter,
    key: &str,
    limit: u64,
    window_secs: u64,
) -> Result<RateQuota, RateQuota> {
    let (count, reset_in) = counter.incr(key, window_secs).await;
    if count > limit {
        Err(RateQuota {
            limit,
            remaining: 0,
            reset_in,
        })
    } else {
        Ok(RateQuota {
            limit,
            remaining: limit.saturating_sub(count),
            reset_in,
        })
    }
}

/// Window length in seconds for a user rate rule duration type.
pub fn duration_type_seconds(duration_type: &str) -> u64 {
    match duration_type.trim().to_lowercase().as_str() {
        "second" | "seconds" => 1,
        "hour" | "hours" => 3600,
        "day" | "days" => 86_400,
        _ => 60,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_allows_limit_then_rejects() {
        let counter = WindowCounter::memory(ChaosState::new());

        for i in 0..2 {
            let quota = check_window(&counter, "login:1.2.3.4", 2, 60).await;
            assert!(quota.is_ok(), "call {i} should pass");
        }
        let over = check_window(&counter, "login:1.2.3.4", 2, 60).await;
        let quota = over.unwrap_err();
        assert_eq!(quota.limit, 2);
        assert_eq!(quota.remaining, 0);
        assert!(quota.reset_in >= 1 && quota.reset_in <= 60);
    }

    #[tokio::test]
    async fn separate_keys_do_not_interfere() {
        let counter = WindowCounter::memory(ChaosState::new());
        assert!(check_window(&counter, "a", 1, 60).await.is_ok());
        assert!(check_window(&counter, "b", 1, 60).await.is_ok());
        assert!(check_window(&counter, "a", 1, 60).await.is_err());
    }

    #[tokio::test]
    async fn window_resets_after_elapse() {
        let counter = WindowCounter::memory(ChaosState::new());
        assert!(check_window(&counter, "k", 1, 1).await.is_ok());
        assert!(check_window(&counter, "k", 1, 1).await.is_err());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(check_window(&counter, "k", 1, 1).await.is_ok());
    }

    #[test]
    fn duration_types() {
        assert_eq!(duration_type_seconds("second"), 1);
        assert_eq!(duration_type_seconds("minute"), 60);
        assert_eq!(duration_type_seconds("Hour"), 3600);
        assert_eq!(duration_type_seconds("day"), 86_400);
        assert_eq!(duration_type_seconds("unknown"), 60);
    }
}
