use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};

use crate::error::ProxyError;
use crate::state::{AppState, CachedResponse};

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ProxyError> {
    let mut query = Vec::new();
    if let Some(q) = params.get("q").or_else(|| params.get("query")) {
        query.push(("query".to_string(), q.clone()));
    }
    copy_paged_params(&params, &mut query);
    hub_passthrough(&state, "https://hub.docker.com/v2/search/repositories/", query).await
}

pub async fn tags_query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ProxyError> {
    let namespace = params.get("namespace").cloned().unwrap_or_default();
    let name = params.get("name").cloned().unwrap_or_default();
    tags_impl(&state, namespace, name, &params).await
}

pub async fn tags_path(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ProxyError> {
    // compatibility wart, preserved bit-exact: a `library`-namespace request
    // whose `name` still contains a slash gets re-split on that slash.
    let (namespace, name) = if namespace == "library" && name.contains('/') {
        let mut parts = name.splitn(2, '/');
        (
            parts.next().unwrap_or_default().to_string(),
            parts.next().unwrap_or_default().to_string(),
        )
    } else {
        (namespace, name)
    };
    tags_impl(&state, namespace, name, &params).await
}

async fn tags_impl(
    state: &Arc<AppState>,
    namespace: String,
    name: String,
    params: &HashMap<String, String>,
) -> Result<Response, ProxyError> {
    let url = format!("https://hub.docker.com/v2/repositories/{namespace}/{name}/tags/");
    let mut query = Vec::new();
    copy_paged_params(params, &mut query);
    hub_passthrough(state, &url, query).await
}

fn copy_paged_params(params: &HashMap<String, String>, out: &mut Vec<(String, String)>) {
    if let Some(page) = params.get("page") {
        out.push(("page".to_string(), page.clone()));
    }
    if let Some(page_size) = params.get("page_size") {
        out.push(("page_size".to_string(), page_size.clone()));
    }
}

async fn hub_passthrough(
    state: &Arc<AppState>,
    base_url: &str,
    query: Vec<(String, String)>,
) -> Result<Response, ProxyError> {
    let full_url = build_url(base_url, &query);

    if let Some(cached) = state.search_cache.get(&full_url) {
        return Ok(cached_response(cached));
    }

    let resp = state
        .hub_http
        .get(&full_url)
        .send()
        .await
        .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let body = resp
        .bytes()
        .await
        .map_err(|e| ProxyError::UpstreamTransport(e.to_string()))?;

    if status.is_success() {
        state.search_cache.set(
            full_url,
            CachedResponse {
                status: status.as_u16(),
                content_type: content_type.clone(),
                body: body.clone(),
            },
        );
    }

    Ok((status, [(CONTENT_TYPE, content_type)], body).into_response())
}

fn cached_response(cached: CachedResponse) -> Response {
    let status = axum::http::StatusCode::from_u16(cached.status)
        .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(CONTENT_TYPE, cached.content_type)], cached.body).into_response()
}

fn build_url(base: &str, query: &[(String, String)]) -> String {
    let mut url = url::Url::parse(base).expect("static base url");
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    url.to_string()
}
