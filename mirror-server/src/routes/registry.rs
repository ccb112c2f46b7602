use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};

use crate::error::ProxyError;
use crate::state::AppState;

fn known_hosts(state: &AppState) -> Vec<String> {
    state.config.registries.keys().cloned().collect()
}

fn client_scheme_and_host(headers: &HeaderMap) -> (String, String) {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https")
        .to_string();
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(axum::http::header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    (scheme, host)
}

pub async fn handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let after_v2 = uri.path().strip_prefix("/v2").unwrap_or("");
    let known = known_hosts(&state);
    let parsed = mirror_classify::classify_registry_path(after_v2, &known);

    if !parsed.image_name.is_empty() {
        let subject = match &parsed.registry_host {
            Some(host) => format!("{host}/{}", parsed.image_name),
            None => parsed.image_name.clone(),
        };
        state
            .config
            .access
            .policy
            .check_docker(&subject)
            .map_err(ProxyError::AccessDenied)?;
    }

    let resp = state
        .registry
        .dispatch(&state.config.registries, &parsed, method, &headers, body)
        .await?;

    let (scheme, host) = client_scheme_and_host(&headers);
    let mut out_headers = mirror_registry::copy_response_headers(resp.headers());
    if let Some(www_auth) = resp.headers().get(axum::http::header::WWW_AUTHENTICATE) {
        if let Some(rewritten) = mirror_registry::rewrite_www_authenticate(www_auth, &scheme, &host) {
            out_headers.append(axum::http::header::WWW_AUTHENTICATE, rewritten);
        }
    }

    let status = resp.status();
    let body = Body::from_stream(resp.bytes_stream());
    Ok((status, out_headers, body).into_response())
}

pub async fn token_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> Result<Response, ProxyError> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();
    let resp = state.registry.proxy_token(&pairs).await?;
    let status = resp.status();
    let headers = mirror_registry::copy_response_headers(resp.headers());
    let body = Body::from_stream(resp.bytes_stream());
    Ok((status, headers, body).into_response())
}
