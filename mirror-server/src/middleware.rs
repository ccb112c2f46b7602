use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use log::warn;
use mirror_ratelimit::{is_exempt_path, Decision, RateLimiter};

use crate::error::ProxyError;
use crate::state::AppState;

/// Gates every non-exempt request through the per-IP token bucket and the
/// CIDR allow/deny lists before it reaches routing.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    let path = req.uri().path();
    if is_exempt_path(path) {
        return Ok(next.run(req).await);
    }

    let forwarded_for = header_str(&req, "x-forwarded-for");
    let real_ip = header_str(&req, "x-real-ip");
    let client_ip = RateLimiter::extract_client_ip(
        forwarded_for.as_deref(),
        real_ip.as_deref(),
        &addr.ip().to_string(),
    );

    match state.rate_limiter.check(&client_ip) {
        Decision::DeniedByList => {
            warn!("{client_ip} denied by IP block list on {path}");
            Err(ProxyError::IpDenied)
        }
        Decision::RateLimited => {
            warn!("{client_ip} rate limited on {path}");
            Err(ProxyError::RateLimited)
        }
        Decision::Allowed => Ok(next.run(req).await),
    }
}

fn header_str(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
