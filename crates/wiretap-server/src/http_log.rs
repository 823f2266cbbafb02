//! Request logging middleware and the catch-all handler.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::server::AppState;

/// Log method, URI, headers and body, then pass the request on.
///
/// The body is buffered up to `max_request_body` bytes and put back, so the
/// request (upgrade extensions included) reaches the handler unchanged.
pub async fn log_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, state.config.max_request_body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(method = %parts.method, uri = %parts.uri, error = %e, "request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    info!(
        method = %parts.method,
        uri = %parts.uri,
        version = ?parts.version,
        headers = %headers_json(&parts.headers),
        "request"
    );
    if !bytes.is_empty() {
        info!(len = bytes.len(), body = %String::from_utf8_lossy(&bytes), "request body");
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Headers as pretty JSON, each name mapping to all of its values.
pub fn headers_json(headers: &HeaderMap) -> String {
    let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        grouped
            .entry(name.as_str())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    serde_json::to_string_pretty(&grouped).unwrap_or_default()
}

/// Any path without a route.
pub async fn fallback() -> &'static str {
    "ok"
}
