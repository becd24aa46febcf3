// ---------------------------------------------------------------------------
// Credit accounting — per-user deduction keyed by API credit group
// ---------------------------------------------------------------------------
// Deduction happens BEFORE the upstream call and is never refunded on
// upstream failure (at-most-once deduction, at-least-once forward risk).

use chrono::Utc;
use serde_json::{Value, json};

use crate::crypto::decrypt_value;
use crate::envelope::GatewayError;
use crate::state::AppState;
use crate::store::{collections, get_path, query};

/// Atomically decrement `available_credits` for `(username, group)`.
/// Zero or missing credits fail the request.
pub async fn deduct_credit(
    state: &AppState,
    group: &str,
    username: &str,
) -> Result<(), GatewayError> {
    let coll = state.collection(collections::USER_CREDITS);
    let user_query = query(&[("username", json!(username))]);

    let doc = coll
        .find_one(&user_query)
        .await?
        .ok_or_else(|| GatewayError::InsufficientCredits(group.to_string()))?;

    let path = format!("users_credits.{group}.available_credits");
    let available = get_path(&doc, &path).and_then(Value::as_u64).unwrap_or(0);
    if available == 0 {
        return Err(GatewayError::InsufficientCredits(group.to_string()));
    }

    coll.update_one(&user_query, &query(&[(path.as_str(), json!(available - 1))]))
        .await?;
    Ok(())
}

/// Resolve the upstream key header for a credit group: the caller's personal
/// key when one is set, otherwise the group key — both keys while a rotation
/// window is open, only the new key after it expires.
pub async fn upstream_key_header(
    state: &AppState,
    group: &str,
    username: &str,
) -> Result<Option<(String, Vec<String>)>, GatewayError> {
    let secret = state.value_encryption_key();

    let def = state
        .collection(collections::CREDIT_DEFS)
        .find_one(&query(&[("api_credit_group", json!(group))]))
        .await?;
    let Some(def) = def else {
        return Ok(None);
    };

    let header = def
        .get("api_key_header")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if header.is_empty() {
        return Ok(None);
    }

    let decrypt = |raw: &str| decrypt_value(secret, raw).unwrap_or_else(|| raw.to_string());

    // Per-user key override wins outright.
    let user_doc = state
        .collection(collections::USER_CREDITS)
        .find_one(&query(&[("username", json!(username))]))
        .await?;
    if let Some(user_doc) = user_doc {
        let path = format!("users_credits.{group}.user_api_key");
        if let Some(user_key) = get_path(&user_doc, &path).and_then(Value::as_str) {
            return Ok(Some((header, vec![decrypt(user_key)])));
        }
    }

    let current = def.get("api_key").and_then(Value::as_str);
    let new = def.get("api_key_new").and_then(Value::as_str);
    let rotation_expires = def
        .get("api_key_rotation_expires")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok());

    let keys = match (current, new, rotation_expires) {
        (Some(old), Some(new), Some(expires)) if expires > Utc::now() => {
            vec![decrypt(old), decrypt(new)]
        }
        (_, Some(new), Some(_)) => vec![decrypt(new)],
        (Some(old), _, _) => vec![decrypt(old)],
        (None, Some(new), None) => vec![decrypt(new)],
        _ => return Ok(None),
    };

    Ok(Some((header, keys)))
}

/// Admin reads never see the key material, only that it exists.
pub fn mask_credit_def(mut doc: Value) -> Value {
    if let Some(obj) = doc.as_object_mut() {
        let present = obj.get("api_key").is_some() || obj.get("api_key_new").is_some();
        obj.remove("api_key");
        obj.remove("api_key_new");
        obj.insert("api_key_present".into(), json!(present));
    }
    doc
}
