//! C8 — the endpoint service: the HTTP handler the orchestrator invokes.
//!
//! Grounded in `examples/original_source/src/dispatch/http.py`'s
//! `FunctionService.do_POST`: content-length validation (reject missing,
//! `<= 0`, or `> 16_000_000`), optional Ed25519 signature verification,
//! protobuf decode, registry lookup, `Scheduler::run`, protobuf encode.
//! `http.py` is written against the stdlib `BaseHTTPRequestHandler`; this
//! crate's teacher already depends on `axum`/`tokio`, so the handler is
//! expressed as an ordinary axum route instead (framework-specific mounting
//! stays out of scope per spec.md §1, but the `Run` RPC's observable
//! behavior — status codes, JSON error shape — does not).

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use prost::Message;

use crate::proto::{Input, Output, ProtoError};
use crate::registry::Registry;
use crate::scheduler::Scheduler;

/// Path the orchestrator posts `RunRequest`s to, per spec.md §6.
pub const RUN_PATH: &str = "/dispatch.sdk.v1.FunctionService/Run";

/// Reject request bodies larger than this many bytes, per spec.md §6.
pub const MAX_CONTENT_LENGTH: usize = 16_000_000;

/// How old a signature may be before it's rejected, per spec.md §6.
const MAX_SIGNATURE_AGE: Duration = Duration::from_secs(5 * 60);

/// Shared state behind every `Run` invocation: the function registry and an
/// optional signature-verification key.
pub struct EndpointState {
    pub registry: Registry,
    pub verification_key: Option<ed25519_dalek::VerifyingKey>,
    pub poll_min_results: u32,
    pub poll_max_results: u32,
    pub poll_max_wait_seconds: Option<u32>,
}

impl EndpointState {
    pub fn new(registry: Registry) -> EndpointState {
        EndpointState {
            registry,
            verification_key: None,
            poll_min_results: 1,
            poll_max_results: 10,
            poll_max_wait_seconds: None,
        }
    }

    pub fn with_verification_key(mut self, key: ed25519_dalek::VerifyingKey) -> EndpointState {
        self.verification_key = Some(key);
        self
    }

    pub fn with_poll_limits(mut self, min_results: u32, max_results: u32) -> EndpointState {
        self.poll_min_results = min_results;
        self.poll_max_results = max_results;
        self
    }
}

/// Builds the axum [`Router`] exposing the `Run` RPC at [`RUN_PATH`].
/// Mounting this into a larger application (a particular web framework's
/// router, Lambda adapter, etc.) is left to the caller, per spec.md §1.
pub fn router(state: Arc<EndpointState>) -> Router {
    Router::new().route(RUN_PATH, post(run)).with_state(state)
}

/// `{status, code, message}` JSON body for error responses, per spec.md §6.
fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    let body = serde_json::json!({
        "status": status.as_u16(),
        "code": code,
        "message": message.into(),
    });
    (status, axum::Json(body)).into_response()
}

async fn run(State(state): State<Arc<EndpointState>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let content_length = match parse_content_length(&parts.headers) {
        Ok(len) => len,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, "invalid_argument", message),
    };

    let bytes = match to_bytes(body, MAX_CONTENT_LENGTH + 1).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_argument", format!("failed to read body: {e}"))
        }
    };
    if bytes.len() != content_length {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_argument",
            format!("content-length header ({content_length}) did not match body size ({})", bytes.len()),
        );
    }

    tracing::debug!(bytes = bytes.len(), "handling run request");

    if let Some(key) = &state.verification_key {
        let headers = &parts.headers;
        let lookup = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let authority = lookup("host").unwrap_or_default();
        let signed_request = crate::signature::Request {
            method: parts.method.as_str(),
            path: parts.uri.path(),
            authority,
            headers: &lookup,
            body: &bytes,
        };
        if let Err(e) = crate::signature::verify_request(&signed_request, key, MAX_SIGNATURE_AGE) {
            return match &e {
                crate::signature::SignatureError::InvalidSignature(_)
                | crate::signature::SignatureError::DigestMismatch => {
                    error_response(StatusCode::FORBIDDEN, "permission_denied", e.to_string())
                }
                _ => error_response(StatusCode::UNAUTHORIZED, "unauthenticated", e.to_string()),
            };
        }
    }

    let req: crate::pb::RunRequest = match Message::decode(bytes) {
        Ok(req) => req,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_argument", format!("invalid RunRequest: {e}"))
        }
    };
    if req.function.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_argument", "function is required");
    }
    if !state.registry.contains(&req.function) {
        tracing::debug!(function = %req.function, "function not found");
        return error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("function '{}' does not exist", req.function),
        );
    }

    let input = match Input::from_request(&req) {
        Ok(input) => input,
        Err(ProtoError::MissingOneOf(field)) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_argument", format!("RunRequest is missing {field}"))
        }
        Err(ProtoError::Codec(e)) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_argument", e.to_string())
        }
    };

    let scheduler = Scheduler::new(&state.registry, &req.function)
        .with_poll_limits(state.poll_min_results, state.poll_max_results)
        .with_poll_max_wait_seconds(state.poll_max_wait_seconds);
    let output = scheduler.run(input);
    log_output(&req.function, &output);

    let mut bytes = Vec::new();
    if output.message.encode(&mut bytes).is_err() {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("function '{}' fatal error", req.function));
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/proto")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn parse_content_length(headers: &HeaderMap) -> Result<usize, &'static str> {
    let raw = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .ok_or("content length is required")?;
    let raw = raw.to_str().map_err(|_| "content length is not valid UTF-8")?;
    let parsed: i64 = raw.parse().map_err(|_| "content length is not a valid integer")?;
    if parsed == 0 {
        return Err("content length is required");
    }
    if parsed < 0 {
        return Err("content length is negative");
    }
    if parsed as usize > MAX_CONTENT_LENGTH {
        return Err("content length is too large");
    }
    Ok(parsed as usize)
}

fn log_output(function: &str, output: &Output) {
    match &output.message.directive {
        Some(crate::pb::run_response::Directive::Poll(poll)) => {
            tracing::debug!(function, calls = poll.calls.len(), "function polling");
        }
        Some(crate::pb::run_response::Directive::Exit(exit)) => {
            if let Some(result) = &exit.result {
                if result.error.is_some() {
                    tracing::debug!(function, "function exiting with error");
                } else {
                    tracing::debug!(function, "function exiting with output value");
                }
            }
            if exit.tail_call.is_some() {
                tracing::debug!(function, "function tail calling");
            }
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Context;
    use axum::body::to_bytes as body_to_bytes;
    use tower::ServiceExt;

    fn build_request(req: &crate::pb::RunRequest) -> Request<Body> {
        let mut bytes = Vec::new();
        req.encode(&mut bytes).unwrap();
        Request::builder()
            .method("POST")
            .uri(RUN_PATH)
            .header("content-type", "application/proto")
            .header("content-length", bytes.len())
            .body(Body::from(bytes))
            .unwrap()
    }

    #[tokio::test]
    async fn missing_content_length_is_rejected() {
        let registry = Registry::new("http://localhost:0");
        let state = Arc::new(EndpointState::new(registry));
        let app = router(state);

        let request = Request::builder()
            .method("POST")
            .uri(RUN_PATH)
            .body(Body::from("oops"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_function_returns_404() {
        let registry = Registry::new("http://localhost:0");
        let state = Arc::new(EndpointState::new(registry));
        let app = router(state);

        let req = crate::pb::RunRequest {
            function: "missing".to_string(),
            input: Some(prost_types::Any::default()),
            ..Default::default()
        };
        let response = app.oneshot(build_request(&req)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn identity_function_round_trips_over_http() {
        let registry = Registry::new("http://localhost:0");
        registry
            .register("greet_name", |_ctx: Context, name: String| async move {
                Ok::<_, crate::error::DispatchError>(format!("Hello world: {name}"))
            })
            .unwrap();
        let state = Arc::new(EndpointState::new(registry));
        let app = router(state);

        let value = crate::value::encode(&"52".to_string()).unwrap();
        let req = crate::pb::RunRequest {
            function: "greet_name".to_string(),
            input: Some(prost_types::Any {
                type_url: value.type_url,
                value: value.bytes,
            }),
            ..Default::default()
        };
        let response = app.oneshot(build_request(&req)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = body_to_bytes(response.into_body(), MAX_CONTENT_LENGTH).await.unwrap();
        let run_response = crate::pb::RunResponse::decode(bytes).unwrap();
        assert_eq!(run_response.status, crate::status::Status::Ok as i32);
        match run_response.directive {
            Some(crate::pb::run_response::Directive::Exit(exit)) => {
                let output = exit.result.unwrap().output.unwrap();
                let value = crate::value::Value {
                    type_url: output.type_url,
                    bytes: output.value,
                };
                let decoded: String = crate::value::decode(&value).unwrap();
                assert_eq!(decoded, "Hello world: 52");
            }
            other => panic!("expected an exit directive, got {other:?}"),
        }
    }
}
