// ---------------------------------------------------------------------------
// handlers/ — platform surface, one file per route group
// ---------------------------------------------------------------------------
// mod.rs re-exports the public handlers so lib.rs routes read as
// `handlers::login`, `handlers::create_api`, etc.

pub(crate) mod apis;
pub(crate) mod authorization;
pub(crate) mod config;
pub(crate) mod credits;
pub(crate) mod endpoints;
pub(crate) mod groups;
pub(crate) mod logging;
pub(crate) mod monitor;
pub(crate) mod proto;
pub(crate) mod roles;
pub(crate) mod routings;
pub(crate) mod security;
pub(crate) mod subscriptions;
pub(crate) mod tools;
pub(crate) mod users;

pub use apis::{create_api, delete_api, get_api, list_apis, update_api};
pub use authorization::{admin_revoke, invalidate, login, refresh, token_status};
pub use config::{export_all, import_all};
pub use credits::{
    create_credit_def, delete_credit_def, get_credit_def, get_user_credits, list_credit_defs,
    set_user_credits,
};
pub use endpoints::{
    create_endpoint, delete_endpoint, get_endpoint, list_endpoints, update_endpoint,
};
pub use groups::{create_group, delete_group, get_group, list_groups, update_group};
pub use logging::{export_logs, list_logs};
pub use monitor::{api_health, api_status, clear_caches, liveness, metrics_snapshot, readiness};
pub use proto::upload_proto;
pub use roles::{create_role, delete_role, get_role, list_roles, update_role};
pub use routings::{create_routing, delete_routing, get_routing, update_routing};
pub use security::{get_security_settings, memory_dump, memory_restore, update_security_settings};
pub use subscriptions::{list_subscriptions, subscribe, unsubscribe};
pub use tools::{chaos_stats, chaos_toggle};
pub use users::{
    create_user, delete_user, get_me, get_user, list_users, update_password, update_user,
};

use serde_json::Value;

use crate::config::GatewaySettings;
use crate::envelope::GatewayError;
use crate::models::PageQuery;

/// Validate pagination and convert to (skip, limit).
pub(crate) fn page_params(
    settings: &GatewaySettings,
    q: &PageQuery,
) -> Result<(u64, u64), GatewayError> {
    if q.page < 1 {
        return Err(GatewayError::BadRequest("page must be >= 1".into()));
    }
    if q.page_size < 1 {
        return Err(GatewayError::BadRequest("page_size must be >= 1".into()));
    }
    if q.page_size > settings.max_page_size {
        return Err(GatewayError::BadRequest(format!(
            "page_size must be <= {}",
            settings.max_page_size
        )));
    }
    Ok(((q.page - 1) * q.page_size, q.page_size))
}

/// Credentials never leave the store on a read path.
pub(crate) fn strip_credentials(mut doc: Value) -> Value {
    if let Some(obj) = doc.as_object_mut() {
        obj.remove("password_hash");
        obj.remove("password");
    }
    doc
}
