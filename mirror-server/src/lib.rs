pub mod error;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::services::{ServeDir, ServeFile};

use state::AppState;

/// Builds the full router: static assets, health, Hub API passthrough,
/// Registry v2 proxy, token endpoint, and the GitHub/HF proxy fallback.
/// Rate limiting and access logging wrap every route.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ready", get(routes::health::ready))
        .route("/search", get(routes::hub::search))
        .route("/tags", get(routes::hub::tags_query))
        .route("/tags/{namespace}/{*name}", get(routes::hub::tags_path))
        .route("/v2", any(routes::registry::handler))
        .route("/v2/", any(routes::registry::handler))
        .route("/v2/{*path}", any(routes::registry::handler))
        .route("/token", any(routes::registry::token_handler))
        .route("/token/{*path}", any(routes::registry::token_handler))
        .route_service("/", ServeFile::new("public/index.html"))
        .route_service("/search.html", ServeFile::new("public/search.html"))
        .route_service("/favicon.ico", ServeFile::new("public/favicon.ico"))
        .nest_service("/public", ServeDir::new("public"))
        .fallback(routes::ghproxy::fallback)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(logging::access_log))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::rate_limit,
                )),
        )
        .with_state(state)
}
