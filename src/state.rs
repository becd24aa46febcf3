// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------
// Every process-wide singleton (store, caches, ledger, counters, metrics,
// chaos, log buffer) is constructed once at lifespan start and carried by
// explicit context through the handlers. Clone-friendly: Arcs all the way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use reqwest::Client;
use serde_json::{Value, json};

use crate::cache::{CacheManager, keys};
use crate::chaos::ChaosState;
use crate::config::{GatewaySettings, StoreMode};
use crate::envelope::GatewayError;
use crate::gateway::backend::BackendRegistry;
use crate::logging::MemoryLogBuffer;
use crate::metrics::MetricsStore;
use crate::models::{RoleDoc, SecuritySettingsDoc};
use crate::protoc::DescriptorRegistry;
use crate::rate_limit::WindowCounter;
use crate::revocation::RevocationLedger;
use crate::store::external::ExternalStore;
use crate::store::memory::MemoryStore;
use crate::store::{Collection, StoreBackend, collections, query};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<GatewaySettings>,
    pub store: StoreBackend,
    pub client: Client,
    pub cache: Arc<CacheManager>,
    pub metrics: Arc<MetricsStore>,
    pub ledger: Arc<RevocationLedger>,
    pub chaos: Arc<ChaosState>,
    pub counter: Arc<WindowCounter>,
    pub log_buffer: Arc<MemoryLogBuffer>,
    pub backends: Arc<BackendRegistry>,
    pub descriptors: Arc<DescriptorRegistry>,
    pub redis: Option<redis::aio::ConnectionManager>,
    pub start_time: Instant,
    /// `true` once startup seeding completes.
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    /// Construct with a caller-provided log buffer so the tracing layer set
    /// up before state creation feeds the same ring the handlers serve.
    pub async fn new_with_log_buffer(
        settings: GatewaySettings,
        log_buffer: Arc<MemoryLogBuffer>,
    ) -> anyhow::Result<Self> {
        let mut state = Self::new(settings).await?;
        state.log_buffer = log_buffer;
        Ok(state)
    }

    pub async fn new(settings: GatewaySettings) -> anyhow::Result<Self> {
        settings.validate()?;

        let chaos = ChaosState::new();

        let (store, redis) = match settings.store_mode {
            StoreMode::Memory => {
                tracing::info!("config store: memory mode (single worker)");
                (StoreBackend::Memory(MemoryStore::new()), None)
            }
            StoreMode::External => {
                let uri = settings
                    .mongodb_uri
                    .as_deref()
                    .expect("validated: external mode has MONGODB_URI");
                let external = ExternalStore::connect(uri, "doorman", Arc::clone(&chaos)).await?;
                let redis = match settings.redis_url.as_deref() {
                    Some(url) => {
                        let client = redis::Client::open(url)?;
                        Some(client.get_connection_manager().await?)
                    }
                    None => None,
                };
                tracing::info!("config store: external mode");
                (StoreBackend::External(external), redis)
            }
        };

        let ledger = match redis.clone() {
            Some(manager) => RevocationLedger::with_redis(Arc::clone(&chaos), manager),
            None => RevocationLedger::new(Arc::clone(&chaos)),
        };
        let counter = match redis.clone() {
            Some(manager) => WindowCounter::with_redis(Arc::clone(&chaos), manager),
            None => WindowCounter::memory(Arc::clone(&chaos)),
        };

        let state = Self {
            settings: Arc::new(settings),
            store,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(5))
                .build()
                .expect("failed to build HTTP client"),
            cache: CacheManager::new(),
            metrics: MetricsStore::new(),
            ledger,
            chaos,
            counter,
            log_buffer: MemoryLogBuffer::new(),
            backends: BackendRegistry::new(),
            descriptors: DescriptorRegistry::new(),
            redis,
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
        };

        state.seed_startup_admin().await?;
        state.mark_ready();
        Ok(state)
    }

    /// Memory-mode state with deterministic test settings and the seeded
    /// admin account.
    pub async fn for_tests() -> Self {
        Self::new(GatewaySettings::for_tests())
            .await
            .expect("test state construction failed")
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    pub fn collection(&self, name: &str) -> Collection {
        self.store.collection(name)
    }

    /// Key used to encrypt secret values at rest.
    pub fn value_encryption_key(&self) -> Option<&str> {
        self.settings
            .token_encryption_key
            .as_deref()
            .or(self.settings.mem_encryption_key.as_deref())
    }

    // ── Startup seeding ─────────────────────────────────────────────────

    /// Seed the admin role/group/user when the user collection is empty.
    /// The configured admin password must pass the strong-password rule.
    async fn seed_startup_admin(&self) -> anyhow::Result<()> {
        let users = self.collection(collections::USERS);
        if users.count(&Default::default()).await? > 0 {
            return Ok(());
        }

        let password = &self.settings.admin_password;
        if !crate::passwords::is_strong(password) {
            anyhow::bail!(crate::config::SettingsError::WeakAdminPassword);
        }

        self.collection(collections::ROLES)
            .insert_one(serde_json::to_value(RoleDoc::admin())?)
            .await?;
        self.collection(collections::GROUPS)
            .insert_one(json!({
                "group_name": "ALL",
                "group_description": "Default group",
                "api_access": [],
            }))
            .await?;

        let hash = crate::passwords::hash(password).await?;
        users
            .insert_one(json!({
                "username": "admin",
                "email": self.settings.admin_email,
                "password_hash": hash,
                "role": "admin",
                "groups": ["ALL"],
                "ui_access": true,
                "active": true,
                "created_at": chrono::Utc::now().to_rfc3339(),
            }))
            .await?;

        tracing::info!("seeded startup admin ({})", self.settings.admin_email);
        Ok(())
    }

    // ── Read-through entity lookups ─────────────────────────────────────

    async fn cached_find_one(
        &self,
        cache_key: String,
        collection: &str,
        q: crate::store::Query,
    ) -> Result<Option<Value>, GatewayError> {
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(Some(hit));
        }
        let found = self.collection(collection).find_one(&q).await?;
        if let Some(doc) = &found {
            self.cache.set(&cache_key, doc.clone());
        }
        Ok(found)
    }

    pub async fn get_api(&self, name: &str, version: &str) -> Result<Option<Value>, GatewayError> {
        self.cached_find_one(
            keys::api(name, version),
            collections::APIS,
            query(&[("api_name", json!(name)), ("api_version", json!(version))]),
        )
        .await
    }

    pub async fn get_endpoint(
        &self,
        name: &str,
        version: &str,
        method: &str,
        uri: &str,
    ) -> Result<Option<Value>, GatewayError> {
        self.cached_find_one(
            keys::endpoint(name, version, method, uri),
            collections::ENDPOINTS,
            query(&[
                ("api_name", json!(name)),
                ("api_version", json!(version)),
                ("endpoint_method", json!(method)),
                ("endpoint_uri", json!(uri)),
            ]),
        )
        .await
    }

    pub async fn get_user(&self, username: &str) -> Result<Option<Value>, GatewayError> {
        self.cached_find_one(
            keys::user(username),
            collections::USERS,
            query(&[("username", json!(username))]),
        )
        .await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<Value>, GatewayError> {
        // Login path; uncached so a disabled account takes effect immediately.
        Ok(self
            .collection(collections::USERS)
            .find_one(&query(&[("email", json!(email))]))
            .await?)
    }

    pub async fn get_role(&self, role_name: &str) -> Result<Option<Value>, GatewayError> {
        self.cached_find_one(
            keys::role(role_name),
            collections::ROLES,
            query(&[("role_name", json!(role_name))]),
        )
        .await
    }

    pub async fn get_group(&self, group_name: &str) -> Result<Option<Value>, GatewayError> {
        self.cached_find_one(
            keys::group(group_name),
            collections::GROUPS,
            query(&[("group_name", json!(group_name))]),
        )
        .await
    }

    pub async fn get_subscriptions(&self, username: &str) -> Result<Vec<String>, GatewayError> {
        let doc = self
            .cached_find_one(
                keys::subscriptions(username),
                collections::SUBSCRIPTIONS,
                query(&[("username", json!(username))]),
            )
            .await?;
        Ok(doc
            .and_then(|d| {
                d.get("apis").and_then(Value::as_array).map(|apis| {
                    apis.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
            })
            .unwrap_or_default())
    }

    pub async fn security_settings(&self) -> SecuritySettingsDoc {
        let doc = self
            .cached_find_one(
                keys::security_settings(),
                collections::SECURITY_SETTINGS,
                Default::default(),
            )
            .await
            .ok()
            .flatten();
        doc.and_then(|d| serde_json::from_value(d).ok())
            .unwrap_or_default()
    }

    // ── Dependency health ───────────────────────────────────────────────

    pub async fn mongo_healthy(&self) -> bool {
        match &self.store {
            StoreBackend::Memory(_) => !self.chaos.should_fail("mongo"),
            StoreBackend::External(external) => external.ping().await,
        }
    }

    pub async fn redis_healthy(&self) -> bool {
        if self.chaos.should_fail("redis") {
            return false;
        }
        match self.redis.clone() {
            None => true,
            Some(mut conn) => {
                let ping = async move {
                    let pong: redis::RedisResult<String> =
                        redis::cmd("PING").query_async(&mut conn).await;
                    pong
                };
                matches!(
                    tokio::time::timeout(std::time::Duration::from_secs(2), ping).await,
                    Ok(Ok(_))
                )
            }
        }
    }
}
