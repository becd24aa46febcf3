// ---------------------------------------------------------------------------
// Backend selection + retry
// ---------------------------------------------------------------------------
// Round-robin over the ordered server list via a process-wide cursor per
// API (or per client routing key). Connect errors, timeouts and 5xx all
// re-select the next server until the retry budget runs out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::envelope::GatewayError;
use crate::state::AppState;

/// Monotonic round-robin cursors, one per selection key.
pub struct BackendRegistry {
    cursors: Mutex<HashMap<String, usize>>,
}

impl BackendRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cursors: Mutex::new(HashMap::new()),
        })
    }

    /// Current cursor for `key`, advanced for the next caller.
    pub fn next_index(&self, key: &str, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let mut cursors = self.cursors.lock().expect("cursor lock poisoned");
        let cursor = cursors.entry(key.to_string()).or_insert(0);
        let index = *cursor % len;
        *cursor = cursor.wrapping_add(1);
        index
    }
}

/// Try each server in round-robin order until one answers without a 5xx, or
/// the retry budget (`api_allowed_retry_count`) is exhausted.
pub async fn send_with_retry<F>(
    state: &AppState,
    cursor_key: &str,
    servers: &[String],
    retry_budget: u32,
    build: F,
) -> Result<reqwest::Response, GatewayError>
where
    F: Fn(&str) -> reqwest::RequestBuilder,
{
    if servers.is_empty() {
        return Err(GatewayError::UpstreamExhausted("no servers configured".into()));
    }

    let attempts = retry_budget as usize + 1;
    let start = state.backends.next_index(cursor_key, servers.len());
    let mut last_error = String::from("unreachable");

    for attempt in 0..attempts {
        let server = &servers[(start + attempt) % servers.len()];
        let request = build(server).timeout(state.settings.upstream_timeout);

        match request.send().await {
            Ok(response) if !response.status().is_server_error() => {
                if attempt > 0 {
                    tracing::info!(
                        "upstream recovered on retry {} via {}",
                        attempt,
                        server
                    );
                }
                return Ok(response);
            }
            Ok(response) => {
                last_error = format!("{server} answered {}", response.status());
                tracing::warn!("upstream attempt {} failed: {}", attempt + 1, last_error);
            }
            Err(e) => {
                last_error = format!("{server}: {e}");
                tracing::warn!("upstream attempt {} failed: {}", attempt + 1, last_error);
            }
        }
    }

    Err(GatewayError::UpstreamExhausted(last_error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_robins_per_key() {
        let registry = BackendRegistry::new();
        assert_eq!(registry.next_index("a", 3), 0);
        assert_eq!(registry.next_index("a", 3), 1);
        assert_eq!(registry.next_index("a", 3), 2);
        assert_eq!(registry.next_index("a", 3), 0);
        // independent cursor per key
        assert_eq!(registry.next_index("b", 3), 0);
    }

    #[test]
    fn cursor_handles_shrinking_server_lists() {
        let registry = BackendRegistry::new();
        for _ in 0..5 {
            registry.next_index("a", 4);
        }
        let index = registry.next_index("a", 2);
        assert!(index < 2);
    }
}
