// ---------------------------------------------------------------------------
// gRPC dispatcher — dynamic unary calls from uploaded descriptors
// ---------------------------------------------------------------------------
// Clients post JSON `{method: "Service.Method", message: {...}}`. The
// descriptor pool uploaded for the API resolves the method, the JSON message
// encodes through prost-reflect, and a raw-bytes codec drives the tonic
// unary call against the elected backend.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor};
use tonic::Status;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::metadata::{MetadataKey, MetadataValue};

use crate::envelope::GatewayError;
use crate::models::GrpcRequest;
use crate::state::AppState;

use super::{
    GatewayContext, REQUEST_ID_HEADER, enforce_credits, error_with_cors, origin_of,
    policy_for_errors, prepare, version_from_header,
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
        let policy = match version_from_header(&headers) {
            Ok(version) => policy_for_errors(&state, &api_name, &version).await,
            Err(_) => None,
        }
        .unwrap_or_else(|| crate::cors::CorsPolicy::global(&state.settings));
        return policy.preflight(origin.as_deref());
    }

    if !state.settings.enable_grpc {
        return GatewayError::BadRequest("gRPC gateway is disabled".into()).into_response();
    }
    if method != Method::POST {
        return GatewayError::BadRequest("gRPC requests must be POSTed".into()).into_response();
    }

    let api_version = match version_from_header(&headers) {
        Ok(version) => version,
        Err(e) => return e.into_response(),
    };

    let ctx = match prepare(&state, &headers, "POST", &api_name, &api_version, "/grpc").await {
        Ok(ctx) => ctx,
        Err(e) => {
            let policy = policy_for_errors(&state, &api_name, &api_version).await;
            return error_with_cors(e, policy.as_ref(), origin.as_deref());
        }
    };

    match forward(&state, &ctx, &api_name, &api_version, request).await {
        Ok(response) => response,
        Err(e) => error_with_cors(e, Some(&ctx.policy), origin.as_deref()),
    }
}

async fn forward(
    state: &AppState,
    ctx: &GatewayContext,
    api_name: &str,
    api_version: &str,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let origin = origin_of(request.headers());

    let credit_headers = enforce_credits(state, ctx).await?;

    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("unreadable request body: {e}")))?;
    let grpc_request: GrpcRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::Validation(format!("malformed gRPC request: {e}")))?;

    let pool = state
        .descriptors
        .get(api_name, api_version)
        .ok_or_else(|| {
            GatewayError::UnknownGrpcMethod(format!(
                "no descriptors uploaded for {api_name}/{api_version}"
            ))
        })?;

    let method = resolve_method(&pool, &grpc_request.method)?;

    let message = DynamicMessage::deserialize(method.input(), grpc_request.message.clone())
        .map_err(|e| GatewayError::Validation(format!("message does not match schema: {e}")))?;

    let path = format!(
        "/{}/{}",
        method.parent_service().full_name(),
        method.name()
    );

    let attempts = ctx.api.api_allowed_retry_count as usize + 1;
    let start = state.backends.next_index(&ctx.cursor_key, ctx.servers.len().max(1));
    let mut last_error = String::from("no servers configured");

    for attempt in 0..attempts {
        if ctx.servers.is_empty() {
            break;
        }
        let server = &ctx.servers[(start + attempt) % ctx.servers.len()];
        match unary_call(
            state,
            server,
            &path,
            &method,
            message.clone(),
            &ctx.request_id,
            &credit_headers,
        )
        .await
        {
            Ok(reply) => {
                let value = serde_json::to_value(&reply)
                    .map_err(|e| GatewayError::Internal(e.to_string()))?;
                let mut response = (StatusCode::OK, Json(value)).into_response();
                if let Ok(header) = HeaderValue::from_str(&ctx.request_id) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static(REQUEST_ID_HEADER), header);
                }
                ctx.policy.apply(origin.as_deref(), response.headers_mut());
                return Ok(response);
            }
            Err(e) => {
                last_error = format!("{server}: {e}");
                tracing::warn!("grpc attempt {} failed: {}", attempt + 1, last_error);
            }
        }
    }

    Err(GatewayError::UpstreamExhausted(last_error))
}

/// `Service.Method` (optionally package-qualified) against the pool.
fn resolve_method(pool: &DescriptorPool, spec: &str) -> Result<MethodDescriptor, GatewayError> {
    let (service_name, method_name) = spec
        .rsplit_once('.')
        .ok_or_else(|| GatewayError::UnknownGrpcMethod(spec.to_string()))?;

    let service = pool
        .services()
        .find(|s| s.full_name() == service_name || s.name() == service_name)
        .ok_or_else(|| GatewayError::UnknownGrpcMethod(spec.to_string()))?;

    service
        .methods()
        .find(|m| m.name() == method_name)
        .ok_or_else(|| GatewayError::UnknownGrpcMethod(spec.to_string()))
}

async fn unary_call(
    state: &AppState,
    server: &str,
    path: &str,
    method: &MethodDescriptor,
    message: DynamicMessage,
    request_id: &str,
    credit_headers: &[(String, Vec<String>)],
) -> Result<DynamicMessage, String> {
    let url = server
        .replacen("grpcs://", "https://", 1)
        .replacen("grpc://", "http://", 1);

    let endpoint = tonic::transport::Endpoint::from_shared(url)
        .map_err(|e| e.to_string())?
        .connect_timeout(std::time::Duration::from_secs(5))
        .timeout(state.settings.upstream_timeout);

    let channel = endpoint.connect().await.map_err(|e| e.to_string())?;
    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready().await.map_err(|e| e.to_string())?;

    let codec = DynamicCodec {
        response: method.output(),
    };
    let path = http::uri::PathAndQuery::try_from(path).map_err(|e| e.to_string())?;

    // Same pipeline contract as the HTTP dispatchers: the request id and any
    // credit key headers (both keys during a rotation window) ride along as
    // call metadata.
    let mut request = tonic::Request::new(message);
    let metadata = request.metadata_mut();
    if let Ok(value) = MetadataValue::try_from(request_id) {
        metadata.insert(REQUEST_ID_HEADER, value);
    }
    for (header, keys) in credit_headers {
        if let Ok(key) = MetadataKey::from_bytes(header.to_lowercase().as_bytes()) {
            for raw in keys {
                if let Ok(value) = MetadataValue::try_from(raw.as_str()) {
                    metadata.append(key.clone(), value);
                }
            }
        }
    }

    let response = grpc
        .unary(request, path, codec)
        .await
        .map_err(|status| status.to_string())?;

    Ok(response.into_inner())
}

// ---------------------------------------------------------------------------
// Raw codec over DynamicMessage
// ---------------------------------------------------------------------------

struct DynamicCodec {
    response: prost_reflect::MessageDescriptor,
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            descriptor: self.response.clone(),
        }
    }
}

struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| Status::internal(e.to_string()))
    }
}

struct DynamicDecoder {
    descriptor: prost_reflect::MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let message = DynamicMessage::decode(self.descriptor.clone(), src)
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Some(message))
    }
}
