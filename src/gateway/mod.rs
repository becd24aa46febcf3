// ---------------------------------------------------------------------------
// Protocol dispatchers — shared request pipeline
// ---------------------------------------------------------------------------
// Every dispatcher walks the same pipeline: resolve API + endpoint, gate on
// subscription, apply the per-user rate rule, deduct credits, merge CORS,
// pick a backend with retry, and pass the upstream response through. Only
// gateway-originated failures wrap in the response envelope.

pub mod backend;
pub mod graphql;
pub mod grpc;
pub mod rest;
pub mod soap;
pub mod validation;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::any;
use serde_json::Value;

use crate::auth::{self, AuthContext};
use crate::cors::CorsPolicy;
use crate::envelope::GatewayError;
use crate::models::{ApiDoc, EndpointDoc};
use crate::rate_limit::{check_window, duration_type_seconds};
use crate::state::AppState;
use crate::store::{collections, query};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const API_VERSION_HEADER: &str = "x-api-version";
pub const CLIENT_KEY_HEADER: &str = "x-client-key";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/rest/{api_name}/{api_version}/{*path}", any(rest::dispatch))
        .route("/api/soap/{api_name}/{api_version}/{*path}", any(soap::dispatch))
        .route("/api/graphql/{api_name}", any(graphql::dispatch))
        .route("/api/grpc/{api_name}", any(grpc::dispatch))
}

/// Everything the dispatchers need once the pipeline gates have passed.
pub struct GatewayContext {
    pub api: ApiDoc,
    pub endpoint: EndpointDoc,
    pub auth: Option<AuthContext>,
    pub policy: CorsPolicy,
    pub request_id: String,
    pub servers: Vec<String>,
    pub cursor_key: String,
}

pub fn origin_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn request_id_of(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// GraphQL and gRPC carry the API version in a header instead of the path.
pub fn version_from_header(headers: &HeaderMap) -> Result<String, GatewayError> {
    headers
        .get(API_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .ok_or(GatewayError::MissingVersionHeader)
}

/// Resolve and gate a gateway request. `method`/`uri` identify the endpoint
/// record; GraphQL and gRPC resolve their conventional `/graphql` / `/grpc`
/// URIs declared at onboarding.
pub async fn prepare(
    state: &AppState,
    headers: &HeaderMap,
    method: &str,
    api_name: &str,
    api_version: &str,
    uri: &str,
) -> Result<GatewayContext, GatewayError> {
    let api_value = state
        .get_api(api_name, api_version)
        .await?
        .ok_or_else(|| GatewayError::ApiNotFound(format!("{api_name}/{api_version}")))?;
    let api: ApiDoc = serde_json::from_value(api_value)
        .map_err(|e| GatewayError::Internal(format!("malformed api document: {e}")))?;
    if !api.active {
        return Err(GatewayError::ApiNotFound(format!("{api_name}/{api_version}")));
    }

    // Public APIs bypass auth entirely; an offered token is still honoured.
    let auth = match auth::authenticate(state, headers).await {
        Ok(auth) => Some(auth),
        Err(_) if api.api_public => None,
        Err(e) => return Err(e),
    };

    let endpoint_value = state
        .get_endpoint(api_name, api_version, method, uri)
        .await?
        .ok_or_else(|| {
            GatewayError::EndpointNotFound(format!("{method} {api_name}/{api_version}{uri}"))
        })?;
    let endpoint: EndpointDoc = serde_json::from_value(endpoint_value)
        .map_err(|e| GatewayError::Internal(format!("malformed endpoint document: {e}")))?;

    if !api.api_public {
        if let Some(auth) = &auth {
            subscription_gate(state, &api, &auth.username).await?;
            user_rate_rule(state, &auth.username).await?;
        }
    }

    let policy = CorsPolicy::for_api(&api, &state.settings);
    let request_id = request_id_of(headers);
    let (servers, cursor_key) = select_servers(state, headers, &api, &endpoint).await?;

    Ok(GatewayContext {
        api,
        endpoint,
        auth,
        policy,
        request_id,
        servers,
        cursor_key,
    })
}

/// Group `api_access` grants bypass the subscription set; everything else
/// must hold a subscription for `api_name/api_version`.
async fn subscription_gate(
    state: &AppState,
    api: &ApiDoc,
    username: &str,
) -> Result<(), GatewayError> {
    let token = format!("{}/{}", api.api_name, api.api_version);

    let user = state
        .get_user(username)
        .await?
        .ok_or_else(|| GatewayError::Auth(format!("unknown user {username}")))?;
    let groups: Vec<String> = user
        .get("groups")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    for group_name in &groups {
        if let Some(group) = state.get_group(group_name).await? {
            let granted = group
                .get("api_access")
                .and_then(Value::as_array)
                .is_some_and(|list| list.iter().any(|v| v.as_str() == Some(token.as_str())));
            if granted {
                return Ok(());
            }
        }
    }

    let subscriptions = state.get_subscriptions(username).await?;
    if subscriptions.contains(&token) {
        Ok(())
    } else {
        Err(GatewayError::NotSubscribed(token))
    }
}

/// Per-user rate rule from the user document, counted across all APIs.
async fn user_rate_rule(state: &AppState, username: &str) -> Result<(), GatewayError> {
    let Some(user) = state.get_user(username).await? else {
        return Ok(());
    };
    let Some(limit) = user.get("rate_limit_duration").and_then(Value::as_u64) else {
        return Ok(());
    };
    let window = duration_type_seconds(
        user.get("rate_limit_duration_type")
            .and_then(Value::as_str)
            .unwrap_or("minute"),
    );

    check_window(&state.counter, &format!("user:{username}"), limit, window)
        .await
        .map(|_| ())
        .map_err(|quota| GatewayError::RateLimited {
            limit: quota.limit,
            remaining: quota.remaining,
            reset_in: quota.reset_in,
        })
}

/// Server list precedence: client routing (X-Client-Key) > per-endpoint
/// override > API servers. Each source keeps its own round-robin cursor.
async fn select_servers(
    state: &AppState,
    headers: &HeaderMap,
    api: &ApiDoc,
    endpoint: &EndpointDoc,
) -> Result<(Vec<String>, String), GatewayError> {
    if let Some(client_key) = headers
        .get(CLIENT_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        let routing = state
            .collection(collections::ROUTINGS)
            .find_one(&query(&[("client_key", serde_json::json!(client_key))]))
            .await?;
        if let Some(routing) = routing {
            let servers: Vec<String> = routing
                .get("routing_servers")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if !servers.is_empty() {
                let cursor_key = format!("routing:{client_key}");
                persist_routing_cursor(state, client_key, &servers).await;
                return Ok((servers, cursor_key));
            }
        }
    }

    if let Some(servers) = endpoint.endpoint_servers.as_ref().filter(|s| !s.is_empty()) {
        let cursor_key = format!(
            "endpoint:{}:{}:{}:{}",
            api.api_name, api.api_version, endpoint.endpoint_method, endpoint.endpoint_uri
        );
        return Ok((servers.clone(), cursor_key));
    }

    let cursor_key = format!("api:{}:{}", api.api_name, api.api_version);
    Ok((api.api_servers.clone(), cursor_key))
}

/// Keep the persisted routing cursor roughly in step with the in-process
/// one; losing an increment only skews the rotation, never correctness.
async fn persist_routing_cursor(state: &AppState, client_key: &str, servers: &[String]) {
    let q = query(&[("client_key", serde_json::json!(client_key))]);
    if let Ok(Some(doc)) = state.collection(collections::ROUTINGS).find_one(&q).await {
        let index = doc
            .get("server_index")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let next = (index + 1) % servers.len().max(1) as u64;
        let _ = state
            .collection(collections::ROUTINGS)
            .update_one(&q, &query(&[("server_index", serde_json::json!(next))]))
            .await;
    }
}

// ---------------------------------------------------------------------------
// Credits + upstream response shaping
// ---------------------------------------------------------------------------

/// Deduct a credit and resolve the upstream key headers when the API charges
/// a credit group. Runs before the upstream call; never refunded.
pub async fn enforce_credits(
    state: &AppState,
    ctx: &GatewayContext,
) -> Result<Vec<(String, Vec<String>)>, GatewayError> {
    let Some(group) = ctx.api.api_credit_group.as_deref() else {
        return Ok(Vec::new());
    };
    let Some(auth) = &ctx.auth else {
        return Ok(Vec::new());
    };

    crate::credits::deduct_credit(state, group, &auth.username).await?;

    let mut headers = Vec::new();
    if let Some((header, keys)) =
        crate::credits::upstream_key_header(state, group, &auth.username).await?
    {
        headers.push((header, keys));
    }
    Ok(headers)
}

/// Headers forwarded to the upstream: content negotiation, the API's
/// passthrough allow list, the request id, and any credit key headers (both
/// keys while a rotation window is open).
pub fn upstream_headers(
    ctx: &GatewayContext,
    original: &HeaderMap,
    credit_headers: &[(String, Vec<String>)],
) -> HeaderMap {
    let mut out = HeaderMap::new();

    for name in ["content-type", "accept", "soapaction"] {
        if let Some(value) = original.get(name) {
            out.insert(HeaderName::from_static(name), value.clone());
        }
    }

    for allowed in &ctx.api.api_allowed_headers {
        if let Ok(name) = HeaderName::from_bytes(allowed.to_lowercase().as_bytes()) {
            if let Some(value) = original.get(&name) {
                out.insert(name, value.clone());
            }
        }
    }

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        out.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    for (header, keys) in credit_headers {
        if let Ok(name) = HeaderName::from_bytes(header.to_lowercase().as_bytes()) {
            for key in keys {
                if let Ok(value) = HeaderValue::from_str(key) {
                    out.append(name.clone(), value);
                }
            }
        }
    }

    out
}

/// Best-effort per-API policy for error responses issued before `prepare`
/// finished.
pub async fn policy_for_errors(
    state: &AppState,
    api_name: &str,
    api_version: &str,
) -> Option<CorsPolicy> {
    let api_value = state.get_api(api_name, api_version).await.ok().flatten()?;
    let api: ApiDoc = serde_json::from_value(api_value).ok()?;
    Some(CorsPolicy::for_api(&api, &state.settings))
}

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Convert a successful upstream reply into the client response: status and
/// body pass through, hop-by-hop headers drop, CORS headers merge in, and
/// the request id echoes back.
pub async fn passthrough_response(
    upstream: reqwest::Response,
    ctx: &GatewayContext,
    origin: Option<&str>,
) -> Result<Response, GatewayError> {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let body = upstream
        .bytes()
        .await
        .map_err(|e| GatewayError::UpstreamExhausted(format!("reading upstream body: {e}")))?;

    ctx.policy.apply(origin, &mut headers);
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    let mut response = Response::builder()
        .status(status)
        .body(Body::from(body))
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Attach per-API CORS headers to a gateway-originated error response.
pub fn error_with_cors(
    error: GatewayError,
    policy: Option<&CorsPolicy>,
    origin: Option<&str>,
) -> Response {
    use axum::response::IntoResponse;
    let mut response = error.into_response();
    if let Some(policy) = policy {
        policy.apply(origin, response.headers_mut());
    }
    response
}
