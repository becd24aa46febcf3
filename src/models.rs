use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Entity documents
// ---------------------------------------------------------------------------
// Stored as JSON in the config store; these structs validate at the ingress
// boundary. Optional fields stay nullable so partial documents round-trip.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiType {
    #[default]
    Rest,
    Soap,
    Graphql,
    Grpc,
}

/// A named + versioned upstream service exposed through the gateway.
/// `(api_name, api_version)` is the composite identity.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiDoc {
    pub api_name: String,
    pub api_version: String,
    #[serde(default)]
    pub api_description: String,
    #[serde(default)]
    pub api_type: ApiType,
    #[serde(default)]
    pub api_servers: Vec<String>,
    #[serde(default)]
    pub api_allowed_roles: Vec<String>,
    #[serde(default)]
    pub api_allowed_groups: Vec<String>,
    #[serde(default)]
    pub api_allowed_retry_count: u32,
    /// Request-header passthrough allow list.
    #[serde(default)]
    pub api_allowed_headers: Vec<String>,
    #[serde(default)]
    pub api_public: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_credit_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_cors_allow_origins: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_cors_allow_methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_cors_allow_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_cors_allow_credentials: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_cors_expose_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

/// A (method, uri) route on an API. Parent API must exist.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EndpointDoc {
    pub api_name: String,
    pub api_version: String,
    pub endpoint_method: String,
    pub endpoint_uri: String,
    #[serde(default)]
    pub endpoint_description: String,
    /// Per-endpoint server override; falls back to the API's servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_servers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UserDoc {
    pub username: String,
    pub email: String,
    /// Salted argon2 hash; handlers strip it before returning user documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub role: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub ui_access: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Per-user gateway rate rule: N requests per window unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_duration_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_duration_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_attributes: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Boolean permission flags evaluated by the role gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RoleDoc {
    pub role_name: String,
    #[serde(default)]
    pub role_description: String,
    #[serde(default)]
    pub manage_users: bool,
    #[serde(default)]
    pub manage_apis: bool,
    #[serde(default)]
    pub manage_endpoints: bool,
    #[serde(default)]
    pub manage_groups: bool,
    #[serde(default)]
    pub manage_roles: bool,
    #[serde(default)]
    pub manage_routings: bool,
    #[serde(default)]
    pub manage_gateway: bool,
    #[serde(default)]
    pub manage_subscriptions: bool,
    #[serde(default)]
    pub manage_security: bool,
    #[serde(default)]
    pub manage_credits: bool,
    #[serde(default)]
    pub manage_auth: bool,
    #[serde(default)]
    pub manage_tokens: bool,
    #[serde(default)]
    pub manage_tiers: bool,
    #[serde(default)]
    pub manage_rate_limits: bool,
    #[serde(default)]
    pub view_analytics: bool,
    #[serde(default)]
    pub view_logs: bool,
    #[serde(default)]
    pub export_logs: bool,
}

impl RoleDoc {
    /// Fully privileged role seeded at startup.
    pub fn admin() -> Self {
        Self {
            role_name: "admin".into(),
            role_description: "Administrator role with full access".into(),
            manage_users: true,
            manage_apis: true,
            manage_endpoints: true,
            manage_groups: true,
            manage_roles: true,
            manage_routings: true,
            manage_gateway: true,
            manage_subscriptions: true,
            manage_security: true,
            manage_credits: true,
            manage_auth: true,
            manage_tokens: true,
            manage_tiers: true,
            manage_rate_limits: true,
            view_analytics: true,
            view_logs: true,
            export_logs: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct GroupDoc {
    pub group_name: String,
    #[serde(default)]
    pub group_description: String,
    /// `"api_name/api_version"` tokens granting access beyond subscriptions.
    #[serde(default)]
    pub api_access: Vec<String>,
}

/// Per-user subscription document: the set of APIs the user may call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SubscriptionDoc {
    pub username: String,
    #[serde(default)]
    pub apis: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreditTier {
    pub tier_name: String,
    pub credits: u64,
    #[serde(default)]
    pub input_limit: u64,
    #[serde(default)]
    pub output_limit: u64,
    #[serde(default)]
    pub reset_frequency: String,
}

/// Billing bucket shared across users; carries the upstream API key
/// (encrypted at rest) and an optional rotation pair.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreditDefDoc {
    pub api_credit_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_header: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_new: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_rotation_expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub credit_tiers: Vec<CreditTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UserCreditEntry {
    pub tier_name: String,
    pub available_credits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UserCreditsDoc {
    pub username: String,
    #[serde(default)]
    pub users_credits: HashMap<String, UserCreditEntry>,
}

/// Client-keyed set of backend servers with its own round-robin cursor.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RoutingDoc {
    pub routing_name: String,
    pub client_key: String,
    #[serde(default)]
    pub routing_servers: Vec<String>,
    #[serde(default)]
    pub routing_description: String,
    #[serde(default)]
    pub server_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SecuritySettingsDoc {
    #[serde(default)]
    pub enable_auto_save: bool,
    #[serde(default = "default_auto_save_frequency")]
    pub auto_save_frequency_seconds: u64,
    #[serde(default)]
    pub dump_path: Option<String>,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    #[serde(default)]
    pub ip_blacklist: Vec<String>,
    #[serde(default)]
    pub trust_x_forwarded_for: bool,
    #[serde(default)]
    pub xff_trusted_proxies: Vec<String>,
    #[serde(default = "default_true")]
    pub allow_localhost_bypass: bool,
}

impl Default for SecuritySettingsDoc {
    fn default() -> Self {
        Self {
            enable_auto_save: false,
            auto_save_frequency_seconds: default_auto_save_frequency(),
            dump_path: None,
            ip_whitelist: Vec::new(),
            ip_blacklist: Vec::new(),
            trust_x_forwarded_for: false,
            xff_trusted_proxies: Vec::new(),
            allow_localhost_bypass: true,
        }
    }
}

fn default_auto_save_frequency() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Wire models
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub csrf_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub groups: Vec<String>,
    #[serde(default)]
    pub ui_access: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub rate_limit_duration: Option<u64>,
    #[serde(default)]
    pub rate_limit_duration_type: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdatePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SubscribeRequest {
    pub username: String,
    pub api_name: String,
    pub api_version: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ChaosToggleRequest {
    pub backend: String,
    pub enabled: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct MemoryRestoreRequest {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default, rename = "operationName")]
    pub operation_name: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct GrpcRequest {
    /// `"Service.Method"` against the uploaded descriptor set.
    pub method: String,
    #[serde(default)]
    pub message: Value,
}

/// Pagination query accepted by every list route.
#[derive(Debug, Clone, Copy, Deserialize, utoipa::IntoParams)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    10
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
        }
    }
}
