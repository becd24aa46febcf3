pub mod auth;
pub mod cache;
pub mod chaos;
pub mod config;
pub mod cors;
pub mod credits;
pub mod crypto;
pub mod envelope;
pub mod gateway;
pub mod handlers;
pub mod ip_policy;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod passwords;
pub mod permissions;
pub mod protoc;
pub mod rate_limit;
pub mod revocation;
pub mod state;
pub mod store;
pub mod tokens;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::envelope::ResponseEnvelope;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request-id middleware
// ---------------------------------------------------------------------------

/// Assigns a correlation id to every request (honouring a client-supplied
/// `X-Request-ID`), forwards it to the handlers via the request headers, and
/// echoes it on the response.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", value);
    }

    let mut response = next.run(request).await;

    if !response.headers().contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }
    }
    response
}

// ---------------------------------------------------------------------------
// Latency injection (chaos testing)
// ---------------------------------------------------------------------------

/// Sleeps for `X-Doorman-Latency` milliseconds (capped at 5 s) when latency
/// injection is enabled via the environment.
pub async fn latency_injection_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if state.settings.enable_latency_injection {
        if let Some(delay_ms) = request
            .headers()
            .get("x-doorman-latency")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            let delay_ms = delay_ms.min(5_000);
            if delay_ms > 0 {
                tracing::warn!("injecting {}ms latency for {}", delay_ms, request.uri().path());
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
        }
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// WebSocket reject (realtime is disabled by default)
// ---------------------------------------------------------------------------

pub async fn websocket_reject_middleware(request: Request<Body>, next: Next) -> Response {
    let is_upgrade = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if is_upgrade {
        return ResponseEnvelope::error(403, envelope::codes::HTTP_EXCEPTION, "WebSocket connections are not enabled")
            .into_response();
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// IP allow/deny policy
// ---------------------------------------------------------------------------

pub async fn ip_policy_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let security = state.security_settings().await;
    let peer = request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip());
    let ip = ip_policy::client_ip(
        request.headers(),
        peer,
        security.trust_x_forwarded_for,
        &security.xff_trusted_proxies,
    );

    if !ip_policy::ip_allowed(&ip, &security) {
        tracing::warn!("request blocked by IP policy: {}", ip);
        return ResponseEnvelope::error(403, envelope::codes::HTTP_EXCEPTION, "IP address not allowed")
            .into_response();
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// OpenAPI documentation
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Doorman API Gateway",
        version = "1.0.0",
        description = "Multi-protocol API gateway: REST, SOAP, GraphQL and gRPC ingress",
        license(name = "MIT")
    ),
    paths(
        handlers::authorization::login,
        handlers::authorization::token_status,
        handlers::monitor::api_health,
        handlers::monitor::api_status,
    ),
    components(schemas(
        envelope::ResponseEnvelope,
        models::LoginRequest,
        models::LoginResponse,
        models::ApiDoc,
        models::EndpointDoc,
        models::RoleDoc,
        models::GroupDoc,
        models::RoutingDoc,
        models::CreditDefDoc,
        models::CreditTier,
        models::UserCreditsDoc,
        models::UserCreditEntry,
        models::SecuritySettingsDoc,
        models::ChaosToggleRequest,
    )),
    tags(
        (name = "authorization", description = "Token issuance & revocation"),
        (name = "monitor", description = "Health, readiness & metrics"),
        (name = "gateway", description = "Protocol dispatchers"),
    )
)]
pub struct OpenApiSpec;

// ---------------------------------------------------------------------------
// Router assembly
// ---------------------------------------------------------------------------

/// Global CORS for the platform surface, built from the environment policy.
/// Strict mode refuses to pair a wildcard origin with credentials.
fn platform_cors(settings: &config::GatewaySettings) -> CorsLayer {
    let wildcard = settings.allowed_origins.iter().any(|o| o == "*");

    let methods: Vec<Method> = settings
        .allow_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    let headers: Vec<header::HeaderName> = settings
        .allow_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    let mut layer = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::list(headers));

    if wildcard {
        if settings.allow_credentials && settings.cors_strict {
            // Credentialed wildcard is forbidden: emit no ACAO at all.
            layer = layer.allow_origin(AllowOrigin::list(Vec::<HeaderValue>::new()));
        } else if settings.allow_credentials {
            layer = layer
                .allow_origin(AllowOrigin::mirror_request())
                .allow_credentials(true);
        } else {
            layer = layer.allow_origin(Any);
        }
    } else {
        let origins: Vec<HeaderValue> = settings
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        layer = layer.allow_origin(AllowOrigin::list(origins));
        if settings.allow_credentials {
            layer = layer.allow_credentials(true);
        }
    }
    layer
}

/// Build the application router. Extracted from `main()` so integration
/// tests can drive the app without binding a socket.
pub fn create_router(state: AppState) -> Router {
    // ── Public routes ───────────────────────────────────────────────────
    let public = Router::new()
        .route("/api/health", get(handlers::api_health))
        .route("/platform/authorization", post(handlers::login))
        .route("/platform/monitor/liveness", get(handlers::liveness))
        .route("/platform/monitor/readiness", get(handlers::readiness))
        .route("/metrics", get(prometheus_metrics));

    // ── Authenticated platform surface ──────────────────────────────────
    let protected = Router::new()
        .route("/api/status", get(handlers::api_status))
        .route("/api/caches", delete(handlers::clear_caches))
        .route("/platform/authorization/refresh", post(handlers::refresh))
        .route("/platform/authorization/invalidate", post(handlers::invalidate))
        .route("/platform/authorization/status", get(handlers::token_status))
        .route(
            "/platform/authorization/admin/revoke/{username}",
            post(handlers::admin_revoke),
        )
        // Users
        .route("/platform/user", post(handlers::create_user))
        .route("/platform/user/me", get(handlers::get_me))
        .route("/platform/user/all", get(handlers::list_users))
        .route(
            "/platform/user/{username}",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route(
            "/platform/user/{username}/update-password",
            put(handlers::update_password),
        )
        // APIs
        .route("/platform/api", post(handlers::create_api))
        .route("/platform/api/all", get(handlers::list_apis))
        .route(
            "/platform/api/{api_name}/{api_version}",
            get(handlers::get_api)
                .put(handlers::update_api)
                .delete(handlers::delete_api),
        )
        // Endpoints
        .route("/platform/endpoint", post(handlers::create_endpoint))
        .route(
            "/platform/endpoint/{api_name}/{api_version}",
            get(handlers::list_endpoints),
        )
        .route(
            "/platform/endpoint/{method}/{api_name}/{api_version}/{*uri}",
            get(handlers::get_endpoint)
                .put(handlers::update_endpoint)
                .delete(handlers::delete_endpoint),
        )
        // Roles & groups
        .route("/platform/role", post(handlers::create_role))
        .route("/platform/role/all", get(handlers::list_roles))
        .route(
            "/platform/role/{role_name}",
            get(handlers::get_role)
                .put(handlers::update_role)
                .delete(handlers::delete_role),
        )
        .route("/platform/group", post(handlers::create_group))
        .route("/platform/group/all", get(handlers::list_groups))
        .route(
            "/platform/group/{group_name}",
            get(handlers::get_group)
                .put(handlers::update_group)
                .delete(handlers::delete_group),
        )
        // Routings
        .route("/platform/routing", post(handlers::create_routing))
        .route(
            "/platform/routing/{client_key}",
            get(handlers::get_routing)
                .put(handlers::update_routing)
                .delete(handlers::delete_routing),
        )
        // Subscriptions
        .route("/platform/subscription/subscribe", post(handlers::subscribe))
        .route("/platform/subscription/unsubscribe", post(handlers::unsubscribe))
        .route(
            "/platform/subscription/{username}",
            get(handlers::list_subscriptions),
        )
        // Credits
        .route("/platform/credit", post(handlers::create_credit_def))
        .route("/platform/credit/defs/all", get(handlers::list_credit_defs))
        .route("/platform/credit/defs/{group}", get(handlers::get_credit_def))
        .route(
            "/platform/credit/{key}",
            post(handlers::set_user_credits)
                .get(handlers::get_user_credits)
                .delete(handlers::delete_credit_def),
        )
        // Security & memory snapshots
        .route(
            "/platform/security/settings",
            get(handlers::get_security_settings).put(handlers::update_security_settings),
        )
        .route("/platform/memory/dump", post(handlers::memory_dump))
        .route("/platform/memory/restore", post(handlers::memory_restore))
        // Config export/import
        .route("/platform/config/export/all", get(handlers::export_all))
        .route("/platform/config/import", post(handlers::import_all))
        // Tools
        .route("/platform/tools/chaos/toggle", post(handlers::chaos_toggle))
        .route("/platform/tools/chaos/stats", get(handlers::chaos_stats))
        // Logging & monitoring
        .route("/platform/logging/logs", get(handlers::list_logs))
        .route("/platform/logging/export", get(handlers::export_logs))
        .route("/platform/monitor/metrics", get(handlers::metrics_snapshot))
        // Proto upload
        .route("/platform/proto/{api_name}/{api_version}", post(handlers::upload_proto))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    public
        .merge(protected)
        .layer(platform_cors(&state.settings))
        // Dispatchers run their own CORS evaluator, outside the platform layer.
        .merge(gateway::routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", OpenApiSpec::openapi()))
        // Each .layer() wraps everything before it, so this reads inner to
        // outer: the metrics recorder sits innermost (requests rejected by
        // the IP policy or the WebSocket guard are never counted), then the
        // policy gates, then latency chaos, with request-id assignment
        // wrapping the whole chain.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics::track_requests,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ip_policy_middleware,
        ))
        .layer(middleware::from_fn(websocket_reject_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            latency_injection_middleware,
        ))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Prometheus scrape endpoint
// ---------------------------------------------------------------------------

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Allowed when the endpoint is public, the scrape token matches, the client
/// IP is allow-listed, or the caller is loopback.
fn metrics_allowed(state: &AppState, request: &Request<Body>) -> bool {
    let settings = &state.settings;
    if settings.prometheus_public {
        return true;
    }

    if let Some(expected) = &settings.prometheus_bearer_token {
        let provided = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
            .or_else(|| {
                request
                    .headers()
                    .get("x-prometheus-token")
                    .and_then(|v| v.to_str().ok())
            });
        if provided.is_some_and(|token| tokens::tokens_match(token.trim(), expected)) {
            return true;
        }
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip());
    let ip = ip_policy::client_ip(request.headers(), peer, settings.prometheus_trust_xff, &[]);

    if !settings.prometheus_allowlist.is_empty() {
        return ip_policy::ip_in_list(&ip, &settings.prometheus_allowlist);
    }
    ip_policy::is_loopback(&ip)
}

async fn prometheus_metrics(State(state): State<AppState>, request: Request<Body>) -> Response {
    if !metrics_allowed(&state, &request) {
        return (
            StatusCode::FORBIDDEN,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            "prometheus_forbidden 1\n",
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render_prometheus(),
    )
        .into_response()
}
