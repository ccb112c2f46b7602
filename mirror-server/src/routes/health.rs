use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn ready(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();
    Json(json!({
        "ready": true,
        "service": "mirror-server",
        "start_time_unix": state.start_time_unix,
        "uptime_sec": uptime.as_secs(),
        "uptime_human": humanize(uptime),
    }))
}

fn humanize(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
