// ---------------------------------------------------------------------------
// Structured logging: secret redaction + in-memory ring buffer
// ---------------------------------------------------------------------------
// Every line headed for the ring buffer passes the redaction filter first,
// so the logging surface can never leak credentials even when a handler logs
// a raw header bundle.

use std::collections::VecDeque;
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use serde_json::json;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;

const DEFAULT_CAPACITY: usize = 50_000;

// Ordered: Set-Cookie must run before the bare Cookie pattern, and the header
// patterns stop at `;` so neighbouring headers stay visible for their own
// passes.
static REDACTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r#"(?i)(authorization\s*[:=]\s*)((?:bearer|basic)\s+)?[^\s;,]+"#).unwrap(),
            "${1}[REDACTED]",
        ),
        (
            Regex::new(r#"(?i)\b((?:bearer|basic)\s+)[A-Za-z0-9._=+/-]+"#).unwrap(),
            "${1}[REDACTED]",
        ),
        (
            Regex::new(r#"(?i)\b(password\s*[:=]\s*["']?)[^"'\s;,]+"#).unwrap(),
            "${1}[REDACTED]",
        ),
        (
            Regex::new(r#"(?i)\b((?:access|refresh)_token(?:_cookie)?\s*[:=]\s*["']?)[^"'\s;,]+"#)
                .unwrap(),
            "${1}[REDACTED]",
        ),
        (
            Regex::new(r#"(?i)(set-cookie\s*[:=]\s*)[^;\r\n]+"#).unwrap(),
            "${1}[REDACTED]",
        ),
        (
            Regex::new(r#"(?i)(^|\s)(cookie\s*[:=]\s*)[^;\r\n]+"#).unwrap(),
            "${1}${2}[REDACTED]",
        ),
        (
            Regex::new(r#"(?i)(x-csrf-token\s*[:=]\s*)[^\s;,]+"#).unwrap(),
            "${1}[REDACTED]",
        ),
        (
            Regex::new(r#"(?i)(x-api-key\s*[:=]\s*)[^\s;,]+"#).unwrap(),
            "${1}[REDACTED]",
        ),
        (
            Regex::new(r#"(?i)\b(api[_-]?key\s*[:=]\s*["']?)[^"'\s;,]+"#).unwrap(),
            "${1}[REDACTED]",
        ),
    ]
});

/// Scrub credential material out of a log line.
pub fn redact(line: &str) -> String {
    let mut out = line.to_string();
    for (pattern, replacement) in REDACTIONS.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

/// Shared in-memory store of recent structured log lines. Survives without
/// file logging so the logging routes always have something to serve.
pub struct MemoryLogBuffer {
    buf: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl MemoryLogBuffer {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        })
    }

    pub fn add(&self, entry: String) {
        let mut buf = self.buf.lock().expect("log buffer lock poisoned");
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<String> {
        let buf = self.buf.lock().expect("log buffer lock poisoned");
        buf.iter().cloned().collect()
    }

    /// Most recent lines, optionally filtered by level and substring.
    pub fn recent(&self, limit: usize, level: Option<&str>, search: Option<&str>) -> Vec<String> {
        let buf = self.buf.lock().expect("log buffer lock poisoned");
        buf.iter()
            .rev()
            .filter(|line| {
                let parsed: Option<serde_json::Value> = serde_json::from_str(line).ok();
                let level_ok = level.is_none_or(|want| {
                    parsed
                        .as_ref()
                        .and_then(|v| v.get("level"))
                        .and_then(|v| v.as_str())
                        .is_some_and(|have| have.eq_ignore_ascii_case(want))
                });
                let search_ok =
                    search.is_none_or(|needle| line.to_lowercase().contains(&needle.to_lowercase()));
                level_ok && search_ok
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.buf.lock().expect("log buffer lock poisoned").clear();
    }
}

// ---------------------------------------------------------------------------
// tracing layer feeding the buffer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MessageVisitor {
    message: String,
    extra: Vec<(String, String)>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.extra
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }
}

/// Subscriber layer that records every event as a compact JSON line in the
/// ring buffer, redacted.
pub struct BufferLayer {
    buffer: Arc<MemoryLogBuffer>,
}

impl BufferLayer {
    pub fn new(buffer: Arc<MemoryLogBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for BufferLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message;
        for (name, value) in visitor.extra {
            message.push_str(&format!(" {name}={value}"));
        }

        let line = json!({
            "time": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            "name": event.metadata().target(),
            "level": event.metadata().level().to_string(),
            "message": redact(&message),
        });
        self.buffer.add(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_password_and_access_token() {
        let secret = "supersecretvalue";
        let line = format!(
            "Authorization: Bearer {secret}; password=\"{secret}\"; access_token=\"{secret}\""
        );
        let out = redact(&line);
        assert!(!out.contains(secret), "secret leaked: {out}");
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn redacts_set_cookie_and_x_api_key() {
        let line =
            "Set-Cookie: access_token_cookie=abc123; Path=/; HttpOnly; Secure; X-API-Key: my-secret-key";
        let out = redact(line);
        let low = out.to_lowercase();
        assert!(low.contains("set-cookie: [redacted]"), "{out}");
        assert!(low.contains("x-api-key: [redacted]"), "{out}");
        assert!(!out.contains("abc123"));
        assert!(!out.contains("my-secret-key"));
    }

    #[test]
    fn redacts_basic_auth_and_csrf_header() {
        let line = "authorization: basic QWxhZGRpbjpvcGVu; X-CSRF-Token: deadbeef";
        let out = redact(line).to_lowercase();
        assert!(out.contains("authorization: [redacted]"));
        assert!(out.contains("x-csrf-token: [redacted]"));
        assert!(!out.contains("qwxhzgrpbjpvcgvu"));
        assert!(!out.contains("deadbeef"));
    }

    #[test]
    fn plain_lines_pass_through() {
        let line = "gateway started on port 8080";
        assert_eq!(redact(line), line);
    }

    #[test]
    fn ring_buffer_caps_and_filters() {
        let buffer = MemoryLogBuffer::with_capacity(3);
        for i in 0..5 {
            buffer.add(
                json!({"level": if i % 2 == 0 { "INFO" } else { "ERROR" }, "message": format!("line {i}")})
                    .to_string(),
            );
        }
        assert_eq!(buffer.snapshot().len(), 3);

        let errors = buffer.recent(10, Some("error"), None);
        assert_eq!(errors.len(), 1);

        let hits = buffer.recent(10, None, Some("line 4"));
        assert_eq!(hits.len(), 1);

        buffer.clear();
        assert!(buffer.snapshot().is_empty());
    }
}
