use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use log::info;

/// Initialises `env_logger` from `RUST_LOG`, defaulting to `info` if unset.
/// Must run exactly once, before anything else in `main`.
pub fn setup_logs() {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();
}

/// One line per request at `info`: method, path, status, elapsed time.
pub async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let resp = next.run(req).await;
    info!("{method} {path} {} {:?}", resp.status(), start.elapsed());
    resp
}
