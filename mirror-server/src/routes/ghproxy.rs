use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};

use mirror_ghproxy::ResponseBody;

use crate::error::ProxyError;
use crate::state::AppState;

pub async fn fallback(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let raw_path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
        .to_string();

    let proxy_base = mirror_ghproxy::derive_proxy_base(
        headers.get("x-forwarded-host").and_then(|v| v.to_str().ok()),
        headers
            .get(axum::http::header::HOST)
            .and_then(|v| v.to_str().ok()),
        headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()),
    );

    let outcome = state
        .ghproxy
        .proxy(
            &raw_path,
            method,
            &headers,
            body,
            &state.config.access.policy,
            state.config.server.file_size,
            &proxy_base,
        )
        .await?;

    let response = match outcome.body {
        ResponseBody::Buffered(bytes) => (outcome.status, outcome.headers, bytes).into_response(),
        ResponseBody::Stream(resp) => {
            (outcome.status, outcome.headers, Body::from_stream(resp.bytes_stream())).into_response()
        }
    };
    Ok(response)
}
