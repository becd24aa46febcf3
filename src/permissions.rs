// ---------------------------------------------------------------------------
// Permission evaluator — boolean predicates over role documents
// ---------------------------------------------------------------------------

use serde_json::Value;

use crate::envelope::GatewayError;
use crate::state::AppState;

/// Flags a route can require. Route declarations reference these by name so
/// the evaluator stays a single Value lookup.
pub mod flags {
    pub const MANAGE_USERS: &str = "manage_users";
    pub const MANAGE_APIS: &str = "manage_apis";
    pub const MANAGE_ENDPOINTS: &str = "manage_endpoints";
    pub const MANAGE_GROUPS: &str = "manage_groups";
    pub const MANAGE_ROLES: &str = "manage_roles";
    pub const MANAGE_ROUTINGS: &str = "manage_routings";
    pub const MANAGE_GATEWAY: &str = "manage_gateway";
    pub const MANAGE_SUBSCRIPTIONS: &str = "manage_subscriptions";
    pub const MANAGE_SECURITY: &str = "manage_security";
    pub const MANAGE_CREDITS: &str = "manage_credits";
    pub const MANAGE_AUTH: &str = "manage_auth";
    pub const VIEW_LOGS: &str = "view_logs";
    pub const EXPORT_LOGS: &str = "export_logs";
}

pub fn role_has_flag(role: &Value, flag: &str) -> bool {
    role.get(flag).and_then(Value::as_bool).unwrap_or(false)
}

/// Fetch the caller's role through the read-through cache and check a flag.
pub async fn require_permission(
    state: &AppState,
    username: &str,
    flag: &str,
) -> Result<(), GatewayError> {
    let user = state
        .get_user(username)
        .await?
        .ok_or_else(|| GatewayError::Auth(format!("unknown user {username}")))?;

    let role_name = user
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let role = state
        .get_role(&role_name)
        .await?
        .ok_or_else(|| GatewayError::RoleNotFound(role_name.clone()))?;

    if role_has_flag(&role, flag) {
        Ok(())
    } else {
        Err(GatewayError::PermissionDenied(format!(
            "user does not have permission {flag}"
        )))
    }
}

/// Whether the caller holds the admin role. The `admin` role document itself
/// is only editable by admins and can never be deleted.
pub async fn is_admin(state: &AppState, username: &str) -> Result<bool, GatewayError> {
    let user = state.get_user(username).await?;
    Ok(user
        .and_then(|u| u.get("role").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|r| r == "admin"))
}
