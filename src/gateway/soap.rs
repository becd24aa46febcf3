// ---------------------------------------------------------------------------
// SOAP dispatcher
// ---------------------------------------------------------------------------
// The client posts a SOAP envelope; the raw XML body forwards to the
// selected server with `Content-Type: text/xml` and the client-supplied
// SOAPAction header preserved.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, Request};
use axum::response::{IntoResponse, Response};

use crate::envelope::GatewayError;
use crate::state::AppState;

use super::backend::send_with_retry;
use super::{
    GatewayContext, enforce_credits, error_with_cors, origin_of, passthrough_response,
    policy_for_errors, prepare, upstream_headers,
};

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
        let policy = policy_for_errors(&state, &api_name, &api_version).await;
        return match policy {
            Some(policy) => policy.preflight(origin.as_deref()),
            None => {
                GatewayError::ApiNotFound(format!("{api_name}/{api_version}")).into_response()
            }
        };
    }

    let ctx = match prepare(&state, &headers, method.as_str(), &api_name, &api_version, &uri).await
    {
        Ok(ctx) => ctx,
        Err(e) => {
            let policy = policy_for_errors(&state, &api_name, &api_version).await;
            return error_with_cors(e, policy.as_ref(), origin.as_deref());
        }
    };

    match forward(&state, &ctx, request, &uri).await {
        Ok(response) => response,
        Err(e) => error_with_cors(e, Some(&ctx.policy), origin.as_deref()),
    }
}

async fn forward(
    state: &AppState,
    ctx: &GatewayContext,
    request: Request<Body>,
    uri: &str,
) -> Result<Response, GatewayError> {
    let method = request.method().clone();
    let headers = request.headers().clone();
    let origin = origin_of(&headers);

    let credit_headers = enforce_credits(state, ctx).await?;

    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("unreadable request body: {e}")))?;

    let mut forward_headers = upstream_headers(ctx, &headers, &credit_headers);
    if !forward_headers.contains_key("content-type") {
        forward_headers.insert("content-type", HeaderValue::from_static("text/xml"));
    }

    let upstream = send_with_retry(
        state,
        &ctx.cursor_key,
        &ctx.servers,
        ctx.api.api_allowed_retry_count,
        |server| {
            let url = format!("{}{uri}", server.trim_end_matches('/'));
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
