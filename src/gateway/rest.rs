// ---------------------------------------------------------------------------
// REST dispatcher
// ---------------------------------------------------------------------------
// Verb, path and query string forward as-is under the selected server;
// request headers are filtered to the API's allow list; the upstream body
// passes through unmodified.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Method, Request};
use axum::response::Response;

use crate::envelope::GatewayError;
use crate::state::AppState;

use super::{
    GatewayContext, enforce_credits, error_with_cors, origin_of, passthrough_response,
    policy_for_errors, prepare, upstream_headers,
};
use super::{backend::send_with_retry, validation::validate_body};

pub async fn dispatch(
    State(state): State<AppState>,
    Path((api_name, api_version, path)): Path<(String, String, String)>,
    request: Request<Body>,
) -> Response {
    let method = request.method().clone();
    let headers = request.headers().clone();
    let origin = origin_of(&headers);
    let uri = format!("/{path}");

    if method == Method::OPTIONS {
        use axum::response::IntoResponse;
        let policy = policy_for_errors(&state, &api_name, &api_version).await;
        return match policy {
            Some(policy) => policy.preflight(origin.as_deref()),
            None => {
                GatewayError::ApiNotFound(format!("{api_name}/{api_version}")).into_response()
            }
        };
    }

    let query_string = request
        .uri()
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();

    let ctx = match prepare(&state, &headers, method.as_str(), &api_name, &api_version, &uri).await
    {
        Ok(ctx) => ctx,
        Err(e) => {
            let policy = policy_for_errors(&state, &api_name, &api_version).await;
            return error_with_cors(e, policy.as_ref(), origin.as_deref());
        }
    };

    match forward(&state, &ctx, request, &uri, &query_string).await {
        Ok(response) => response,
        Err(e) => error_with_cors(e, Some(&ctx.policy), origin.as_deref()),
    }
}

async fn forward(
    state: &AppState,
    ctx: &GatewayContext,
    request: Request<Body>,
    uri: &str,
    query_string: &str,
) -> Result<Response, GatewayError> {
    let method = request.method().clone();
    let headers = request.headers().clone();
    let origin = origin_of(&headers);

    let credit_headers = enforce_credits(state, ctx).await?;

    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("unreadable request body: {e}")))?;

    if let Some(schema) = &ctx.endpoint.validation_schema {
        if !body.is_empty() {
            let parsed: serde_json::Value = serde_json::from_slice(&body)
                .map_err(|e| GatewayError::Validation(format!("body is not valid JSON: {e}")))?;
            validate_body(schema, &parsed).map_err(GatewayError::Validation)?;
        }
    }

    let forward_headers = upstream_headers(ctx, &headers, &credit_headers);

    let upstream = send_with_retry(
        state,
        &ctx.cursor_key,
        &ctx.servers,
        ctx.api.api_allowed_retry_count,
        |server| {
            let url = format!("{}{uri}{query_string}", server.trim_end_matches('/'));
            state
                .client
                .request(method.clone(), url)
                .headers(forward_headers.clone())
                .body(body.clone())
        },
    )
    .await?;

    passthrough_response(upstream, ctx, origin.as_deref()).await
}
