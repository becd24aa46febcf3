// ---------------------------------------------------------------------------
// Gateway settings — parsed once at startup from the environment
// ---------------------------------------------------------------------------

use std::time::Duration;

/// Which backing store holds the configuration entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// In-process collections; single worker only.
    Memory,
    /// External document store (MongoDB) + shared counters (Redis).
    External,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("memory mode cannot run with THREADS={0}: in-process state has no coherence protocol, use a single worker or switch MEM_OR_EXTERNAL")]
    MemoryModeMultiWorker(usize),

    #[error("MEM_OR_EXTERNAL=EXTERNAL requires MONGODB_URI to be set")]
    MissingExternalCredentials,

    #[error("admin password does not satisfy the strong-password rule (>=12 chars, upper, lower, digit, punctuation)")]
    WeakAdminPassword,
}

/// Process-wide configuration snapshot. Every recognized environment
/// variable lands here; handlers read it via `AppState`.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub env: String,
    pub base_url: String,
    pub admin_email: String,
    pub admin_password: String,

    pub https_only: bool,
    pub https_enabled: bool,
    pub cookie_domain: Option<String>,

    pub store_mode: StoreMode,
    pub mem_encryption_key: Option<String>,
    pub mem_dump_path: String,
    pub threads: usize,

    pub jwt_secret: String,
    pub token_encryption_key: Option<String>,
    pub token_ttl_seconds: u64,

    pub allowed_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    pub cors_strict: bool,

    pub login_ip_rate_limit: u64,
    pub login_ip_rate_window: u64,
    pub login_ip_rate_disabled: bool,

    pub max_page_size: u64,
    pub max_multipart_size_bytes: usize,
    pub enable_latency_injection: bool,

    pub prometheus_public: bool,
    pub prometheus_bearer_token: Option<String>,
    pub prometheus_allowlist: Vec<String>,
    pub prometheus_trust_xff: bool,

    pub mongodb_uri: Option<String>,
    pub redis_url: Option<String>,

    pub enable_grpc: bool,
    pub proto_root: Option<String>,
    pub upstream_timeout: Duration,
    pub port: u16,
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn env_num<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl GatewaySettings {
    pub fn from_env() -> Self {
        let store_mode = match std::env::var("MEM_OR_EXTERNAL")
            .unwrap_or_else(|_| "MEM".into())
            .trim()
            .to_uppercase()
            .as_str()
        {
            "MEM" | "MEMORY" | "" => StoreMode::Memory,
            _ => StoreMode::External,
        };

        let allowed_origins = {
            let list = env_list("ALLOWED_ORIGINS");
            if list.is_empty() { vec!["*".to_string()] } else { list }
        };
        let allow_methods = {
            let list = env_list("ALLOW_METHODS");
            if list.is_empty() {
                ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                    .iter()
                    .map(|m| m.to_string())
                    .collect()
            } else {
                list
            }
        };
        let allow_headers = {
            let list = env_list("ALLOW_HEADERS");
            if list.is_empty() {
                vec!["Content-Type".to_string(), "Authorization".to_string()]
            } else {
                list
            }
        };

        Self {
            env: std::env::var("ENV").unwrap_or_else(|_| "development".into()),
            base_url: std::env::var("DOORMAN_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            admin_email: std::env::var("DOORMAN_ADMIN_EMAIL")
                .unwrap_or_else(|_| "admin@doorman.dev".into()),
            admin_password: std::env::var("DOORMAN_ADMIN_PASSWORD").unwrap_or_default(),

            https_only: env_flag("HTTPS_ONLY", false),
            https_enabled: env_flag("HTTPS_ENABLED", false),
            cookie_domain: std::env::var("COOKIE_DOMAIN").ok().filter(|v| !v.is_empty()),

            store_mode,
            mem_encryption_key: std::env::var("MEM_ENCRYPTION_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            mem_dump_path: std::env::var("MEM_DUMP_PATH")
                .unwrap_or_else(|_| "memory_dumps/doorman_dump.bin".into()),
            threads: env_num("THREADS", 1),

            jwt_secret: std::env::var("JWT_SECRET_KEY")
                .unwrap_or_else(|_| "doorman-dev-secret".into()),
            token_encryption_key: std::env::var("TOKEN_ENCRYPTION_KEY")
                .ok()
                .filter(|v| !v.is_empty()),
            token_ttl_seconds: env_num("TOKEN_EXPIRY_SECONDS", 3600),

            allowed_origins,
            allow_methods,
            allow_headers,
            allow_credentials: env_flag("ALLOW_CREDENTIALS", false),
            cors_strict: env_flag("CORS_STRICT", true),

            login_ip_rate_limit: env_num("LOGIN_IP_RATE_LIMIT", 10),
            login_ip_rate_window: env_num("LOGIN_IP_RATE_WINDOW", 60),
            login_ip_rate_disabled: env_flag("LOGIN_IP_RATE_DISABLED", false),

            max_page_size: env_num("MAX_PAGE_SIZE", 100),
            max_multipart_size_bytes: env_num("MAX_MULTIPART_SIZE_BYTES", 5_242_880),
            enable_latency_injection: env_flag("ENABLE_LATENCY_INJECTION", false),

            prometheus_public: env_flag("PROMETHEUS_PUBLIC", false),
            prometheus_bearer_token: std::env::var("PROMETHEUS_BEARER_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            prometheus_allowlist: env_list("PROMETHEUS_ALLOWLIST"),
            prometheus_trust_xff: env_flag("PROMETHEUS_TRUST_XFF", false),

            mongodb_uri: std::env::var("MONGODB_URI").ok().filter(|v| !v.is_empty()),
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),

            enable_grpc: env_flag("ENABLE_GRPC", true),
            proto_root: std::env::var("PROTO_ROOT").ok().filter(|v| !v.is_empty()),
            upstream_timeout: Duration::from_secs(env_num("UPSTREAM_TIMEOUT_SECONDS", 30)),
            port: env_num("PORT", 8080),
        }
    }

    /// HTTPS posture governs Secure cookies and the CSRF double-submit check.
    pub fn https_posture(&self) -> bool {
        self.https_only || self.https_enabled
    }

    /// Startup guard: memory mode has no cross-worker coherence, and external
    /// mode cannot run without store credentials.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.store_mode == StoreMode::Memory && self.threads > 1 {
            return Err(SettingsError::MemoryModeMultiWorker(self.threads));
        }
        if self.store_mode == StoreMode::External && self.mongodb_uri.is_none() {
            return Err(SettingsError::MissingExternalCredentials);
        }
        Ok(())
    }

    /// Settings for tests: memory mode, single worker, deterministic secrets.
    pub fn for_tests() -> Self {
        Self {
            env: "test".into(),
            base_url: "http://localhost:8080".into(),
            admin_email: "admin@doorman.dev".into(),
            admin_password: "Password123!Password".into(),
            https_only: false,
            https_enabled: false,
            cookie_domain: None,
            store_mode: StoreMode::Memory,
            mem_encryption_key: Some("test-secret-123".into()),
            mem_dump_path: std::env::temp_dir()
                .join("doorman_dump.bin")
                .to_string_lossy()
                .into_owned(),
            threads: 1,
            jwt_secret: "test-jwt-secret".into(),
            token_encryption_key: None,
            token_ttl_seconds: 3600,
            allowed_origins: vec!["*".into()],
            allow_methods: vec!["GET".into(), "POST".into(), "PUT".into(), "DELETE".into()],
            allow_headers: vec!["Content-Type".into(), "Authorization".into()],
            allow_credentials: false,
            cors_strict: true,
            login_ip_rate_limit: 1000,
            login_ip_rate_window: 60,
            login_ip_rate_disabled: false,
            max_page_size: 100,
            max_multipart_size_bytes: 5_242_880,
            enable_latency_injection: false,
            prometheus_public: false,
            prometheus_bearer_token: None,
            prometheus_allowlist: Vec::new(),
            prometheus_trust_xff: false,
            mongodb_uri: None,
            redis_url: None,
            enable_grpc: true,
            proto_root: None,
            upstream_timeout: Duration::from_secs(10),
            port: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_mode_multi_worker_refuses_to_start() {
        let mut settings = GatewaySettings::for_tests();
        settings.threads = 2;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::MemoryModeMultiWorker(2))
        ));
    }

    #[test]
    fn memory_mode_single_worker_is_allowed() {
        let settings = GatewaySettings::for_tests();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn external_mode_multi_worker_is_allowed() {
        let mut settings = GatewaySettings::for_tests();
        settings.store_mode = StoreMode::External;
        settings.mongodb_uri = Some("mongodb://localhost:27017".into());
        settings.threads = 4;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn external_mode_without_credentials_fails() {
        let mut settings = GatewaySettings::for_tests();
        settings.store_mode = StoreMode::External;
        settings.mongodb_uri = None;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::MissingExternalCredentials)
        ));
    }

    #[test]
    fn https_posture_from_either_flag() {
        let mut settings = GatewaySettings::for_tests();
        assert!(!settings.https_posture());
        settings.https_enabled = true;
        assert!(settings.https_posture());
        settings.https_enabled = false;
        settings.https_only = true;
        assert!(settings.https_posture());
    }
}
