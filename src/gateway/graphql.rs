// ---------------------------------------------------------------------------
// GraphQL dispatcher
// ---------------------------------------------------------------------------
// `POST /api/graphql/{api}` with the version in X-API-Version. The dispatcher
// rewrites to `POST {server}/graphql`; a 200 carrying an `errors` array is a
// valid GraphQL response and passes through untouched.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::envelope::GatewayError;
use crate::models::GraphqlRequest;
use crate::state::AppState;

use super::backend::send_with_retry;
use super::{
    GatewayContext, enforce_credits, error_with_cors, origin_of, passthrough_response,
    policy_for_errors, prepare, upstream_headers, version_from_header,
};

pub async fn dispatch(
    State(state): State<AppState>,
    Path(api_name): Path<String>,
    request: Request<Body>,
) -> Response {
    let method = request.method().clone();
    let headers = request.headers().clone();
    let origin = origin_of(&headers);

    if method == Method::OPTIONS {
        // Preflight cannot require the version header; fall back to the
        // global policy when the header (and with it the API) is unknown.
        let policy = match version_from_header(&headers) {
            Ok(version) => policy_for_errors(&state, &api_name, &version).await,
            Err(_) => None,
        }
        .unwrap_or_else(|| crate::cors::CorsPolicy::global(&state.settings));
        return policy.preflight(origin.as_deref());
    }

    if method != Method::POST {
        return GatewayError::BadRequest("GraphQL requests must be POSTed".into()).into_response();
    }

    let api_version = match version_from_header(&headers) {
        Ok(version) => version,
        Err(e) => return e.into_response(),
    };

    let ctx = match prepare(&state, &headers, "POST", &api_name, &api_version, "/graphql").await {
        Ok(ctx) => ctx,
        Err(e) => {
            let policy = policy_for_errors(&state, &api_name, &api_version).await;
            return error_with_cors(e, policy.as_ref(), origin.as_deref());
        }
    };

    match forward(&state, &ctx, request).await {
        Ok(response) => response,
        Err(e) => error_with_cors(e, Some(&ctx.policy), origin.as_deref()),
    }
}

async fn forward(
    state: &AppState,
    ctx: &GatewayContext,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let headers = request.headers().clone();
    let origin = origin_of(&headers);

    let credit_headers = enforce_credits(state, ctx).await?;

    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("unreadable request body: {e}")))?;
    let graphql: GraphqlRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::Validation(format!("malformed GraphQL request: {e}")))?;

    if let Some(schema) = &ctx.endpoint.validation_schema {
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
        super::validation::validate_body(schema, &parsed).map_err(GatewayError::Validation)?;
    }

    let payload = json!({
        "query": graphql.query,
        "variables": graphql.variables.unwrap_or(json!({})),
        "operationName": graphql.operation_name,
    });

    let forward_headers = upstream_headers(ctx, &headers, &credit_headers);

    let upstream = send_with_retry(
        state,
        &ctx.cursor_key,
        &ctx.servers,
        ctx.api.api_allowed_retry_count,
        |server| {
            let url = format!("{}/graphql", server.trim_end_matches('/'));
            state
                .client
                .post(url)
                .headers(forward_headers.clone())
                .json(&payload)
        },
    )
    .await?;

    passthrough_response(upstream, ctx, origin.as_deref()).await
}
