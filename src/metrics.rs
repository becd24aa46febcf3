// ---------------------------------------------------------------------------
// Metrics store — request counting, byte accounting, latency bucketing
// ---------------------------------------------------------------------------
// Hot-path counters are atomics; the status histogram and rolling per-minute
// latency buckets sit behind one coarse lock that only snapshot/record touch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const MAX_BUCKETS: usize = 60;

/// One minute of latency/status data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyBucket {
    pub minute: i64,
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
    #[serde(default)]
    pub status_counts: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    status_counts: HashMap<String, u64>,
    buckets: Vec<LatencyBucket>,
}

pub struct MetricsStore {
    total_requests: AtomicU64,
    total_bytes_in: AtomicU64,
    total_bytes_out: AtomicU64,
    inner: Mutex<MetricsInner>,
    started: Instant,
}

impl MetricsStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicU64::new(0),
            total_bytes_in: AtomicU64::new(0),
            total_bytes_out: AtomicU64::new(0),
            inner: Mutex::new(MetricsInner::default()),
            started: Instant::now(),
        })
    }

    pub fn record(&self, status: u16, bytes_in: u64, bytes_out: u64, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.total_bytes_out.fetch_add(bytes_out, Ordering::Relaxed);

        let status_key = status.to_string();
        let minute = chrono::Utc::now().timestamp() / 60;

        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        *inner.status_counts.entry(status_key.clone()).or_insert(0) += 1;

        match inner.buckets.last_mut() {
            Some(bucket) if bucket.minute == minute => {
                bucket.count += 1;
                bucket.total_ms += latency_ms;
                bucket.max_ms = bucket.max_ms.max(latency_ms);
                *bucket.status_counts.entry(status_key).or_insert(0) += 1;
            }
            _ => {
                let mut status_counts = HashMap::new();
                status_counts.insert(status_key, 1);
                inner.buckets.push(LatencyBucket {
                    minute,
                    count: 1,
                    total_ms: latency_ms,
                    max_ms: latency_ms,
                    status_counts,
                });
                if inner.buckets.len() > MAX_BUCKETS {
                    let drop = inner.buckets.len() - MAX_BUCKETS;
                    inner.buckets.drain(..drop);
                }
            }
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Full snapshot; status-code keys are always strings so a file round
    /// trip compares equal.
    pub fn to_dict(&self) -> Value {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        json!({
            "total_requests": self.total_requests.load(Ordering::Relaxed),
            "total_bytes_in": self.total_bytes_in.load(Ordering::Relaxed),
            "total_bytes_out": self.total_bytes_out.load(Ordering::Relaxed),
            "status_counts": inner.status_counts,
            "buckets": inner.buckets,
        })
    }

    /// Replace all counters from a snapshot (empty object zeroes everything).
    pub fn load_dict(&self, data: &Value) {
        let get_u64 = |key: &str| data.get(key).and_then(Value::as_u64).unwrap_or(0);
        self.total_requests.store(get_u64("total_requests"), Ordering::Relaxed);
        self.total_bytes_in.store(get_u64("total_bytes_in"), Ordering::Relaxed);
        self.total_bytes_out.store(get_u64("total_bytes_out"), Ordering::Relaxed);

        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.status_counts = data
            .get("status_counts")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        inner.buckets = data
            .get("buckets")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
    }

    pub async fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let snapshot = self.to_dict();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, bytes).await
    }

    pub async fn load_from_file(&self, path: &Path) -> std::io::Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let data: Value = serde_json::from_slice(&bytes)?;
        self.load_dict(&data);
        Ok(())
    }

    /// Prometheus exposition (text format 0.0.4).
    pub fn render_prometheus(&self) -> String {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        let mut out = String::new();
        out.push_str("# HELP doorman_requests_total Total requests processed\n");
        out.push_str("# TYPE doorman_requests_total counter\n");
        out.push_str(&format!(
            "doorman_requests_total {}\n",
            self.total_requests.load(Ordering::Relaxed)
        ));
        out.push_str("# HELP doorman_bytes_in_total Request bytes received\n");
        out.push_str("# TYPE doorman_bytes_in_total counter\n");
        out.push_str(&format!(
            "doorman_bytes_in_total {}\n",
            self.total_bytes_in.load(Ordering::Relaxed)
        ));
        out.push_str("# HELP doorman_bytes_out_total Response bytes sent\n");
        out.push_str("# TYPE doorman_bytes_out_total counter\n");
        out.push_str(&format!(
            "doorman_bytes_out_total {}\n",
            self.total_bytes_out.load(Ordering::Relaxed)
        ));
        out.push_str("# HELP doorman_responses_total Responses by status code\n");
        out.push_str("# TYPE doorman_responses_total counter\n");
        let mut statuses: Vec<_> = inner.status_counts.iter().collect();
        statuses.sort();
        for (status, count) in statuses {
            out.push_str(&format!(
                "doorman_responses_total{{status=\"{status}\"}} {count}\n"
            ));
        }
        out.push_str("# HELP doorman_uptime_seconds Gateway uptime\n");
        out.push_str("# TYPE doorman_uptime_seconds counter\n");
        out.push_str(&format!("doorman_uptime_seconds {}\n", self.uptime_seconds()));
        out
    }
}

/// Response middleware: counts every request, accounts bytes from the
/// Content-Length headers, and feeds the latency buckets.
pub async fn track_requests(
    axum::extract::State(state): axum::extract::State<crate::state::AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let bytes_in = content_length(request.headers());
    let start = Instant::now();

    let response = next.run(request).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let bytes_out = content_length(response.headers());
    state
        .metrics
        .record(response.status().as_u16(), bytes_in, bytes_out, latency_ms);
    response
}

fn content_length(headers: &axum::http::HeaderMap) -> u64 {
    headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_counters_and_buckets() {
        let metrics = MetricsStore::new();
        metrics.record(200, 100, 250, 12);
        metrics.record(200, 50, 50, 8);
        metrics.record(404, 0, 30, 2);

        let snapshot = metrics.to_dict();
        assert_eq!(snapshot["total_requests"], 3);
        assert_eq!(snapshot["total_bytes_in"], 150);
        assert_eq!(snapshot["total_bytes_out"], 330);
        assert_eq!(snapshot["status_counts"]["200"], 2);
        assert_eq!(snapshot["status_counts"]["404"], 1);
        let buckets = snapshot["buckets"].as_array().unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0]["count"], 3);
        assert_eq!(buckets[0]["max_ms"], 12);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let metrics = MetricsStore::new();
        metrics.record(200, 10, 20, 5);
        metrics.record(500, 1, 2, 90);
        let before = metrics.to_dict();

        metrics.save_to_file(&path).await.unwrap();

        metrics.load_dict(&json!({}));
        assert_eq!(metrics.to_dict()["total_requests"], 0);
        assert_eq!(metrics.to_dict()["total_bytes_in"], 0);

        metrics.load_from_file(&path).await.unwrap();
        assert_eq!(metrics.to_dict(), before);
    }

    #[test]
    fn prometheus_render_contains_counters() {
        let metrics = MetricsStore::new();
        metrics.record(200, 0, 0, 1);
        let text = metrics.render_prometheus();
        assert!(text.contains("doorman_requests_total 1"));
        assert!(text.contains("doorman_responses_total{status=\"200\"} 1"));
    }
}
