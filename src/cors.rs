// ---------------------------------------------------------------------------
// CORS evaluator — per-API policy with global fallback
// ---------------------------------------------------------------------------
// The dispatcher owns CORS for gateway routes so a response carries exactly
// one Access-Control-Allow-Origin value. The platform subtree uses a single
// tower-http layer built from the same global policy.

use axum::http::header::{HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::config::GatewaySettings;
use crate::models::ApiDoc;

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    pub expose_headers: Vec<String>,
    pub strict: bool,
}

impl CorsPolicy {
    pub fn global(settings: &GatewaySettings) -> Self {
        Self {
            allow_origins: settings.allowed_origins.clone(),
            allow_methods: settings.allow_methods.clone(),
            allow_headers: settings.allow_headers.clone(),
            allow_credentials: settings.allow_credentials,
            expose_headers: Vec::new(),
            strict: settings.cors_strict,
        }
    }

    /// Per-API policy when the API declares one; the global policy otherwise.
    pub fn for_api(api: &ApiDoc, settings: &GatewaySettings) -> Self {
        match &api.api_cors_allow_origins {
            Some(origins) => Self {
                allow_origins: origins.clone(),
                allow_methods: api
                    .api_cors_allow_methods
                    .clone()
                    .unwrap_or_else(|| settings.allow_methods.clone()),
                allow_headers: api
                    .api_cors_allow_headers
                    .clone()
                    .unwrap_or_else(|| settings.allow_headers.clone()),
                allow_credentials: api.api_cors_allow_credentials.unwrap_or(false),
                expose_headers: api.api_cors_expose_headers.clone().unwrap_or_default(),
                strict: settings.cors_strict,
            },
            None => Self::global(settings),
        }
    }

    /// The origin value to echo, or None when the origin is not allowed.
    /// A `*` entry matches any origin, except under strict mode with
    /// credentials, where a wildcard must not be echoed at all.
    pub fn echo_origin(&self, origin: &str) -> Option<String> {
        let wildcard = self.allow_origins.iter().any(|o| o == "*");
        if wildcard {
            if self.allow_credentials && self.strict {
                return None;
            }
            return Some(origin.to_string());
        }
        self.allow_origins
            .iter()
            .any(|o| o == origin)
            .then(|| origin.to_string())
    }

    /// Preflight response. ACAO is emitted whenever the origin matches,
    /// regardless of the requested headers; the actual request is where
    /// header enforcement happens.
    pub fn preflight(&self, origin: Option<&str>) -> Response {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let Some(origin) = origin else {
            return response;
        };
        let Some(echo) = self.echo_origin(origin) else {
            return response;
        };

        let headers = response.headers_mut();
        insert(headers, "access-control-allow-origin", &echo);
        insert(
            headers,
            "access-control-allow-methods",
            &self.allow_methods.join(", "),
        );
        insert(
            headers,
            "access-control-allow-headers",
            &self.allow_headers.join(", "),
        );
        if self.allow_credentials {
            insert(headers, "access-control-allow-credentials", "true");
        }
        if !self.expose_headers.is_empty() {
            insert(
                headers,
                "access-control-expose-headers",
                &self.expose_headers.join(", "),
            );
        }
        headers.insert("vary", HeaderValue::from_static("origin"));
        response
    }

    /// Merge CORS response headers onto an actual (non-preflight) response.
    /// `HeaderMap::insert` keeps the single-ACAO invariant even when an
    /// upstream response already carried one.
    pub fn apply(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        let Some(origin) = origin else { return };
        let Some(echo) = self.echo_origin(origin) else {
            headers.remove("access-control-allow-origin");
            return;
        };
        insert(headers, "access-control-allow-origin", &echo);
        if self.allow_credentials {
            insert(headers, "access-control-allow-credentials", "true");
        }
        if !self.expose_headers.is_empty() {
            insert(
                headers,
                "access-control-expose-headers",
                &self.expose_headers.join(", "),
            );
        }
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
