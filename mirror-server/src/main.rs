use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to config.toml; a fully defaulted config is used if absent.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Periodically drops inactive rate-limit buckets so the table doesn't
/// grow unbounded under a long-running process.
fn spawn_janitor(state: Arc<mirror_server::state::AppState>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(20 * 60));
        loop {
            tick.tick().await;
            state.rate_limiter.janitor_sweep();
        }
    });
}

#[tokio::main]
async fn main() {
    mirror_server::logging::setup_logs();

    let args = Args::parse();
    let config = match mirror_config::Config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = match mirror_server::state::AppState::new(config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to initialise server state: {e}");
            std::process::exit(1);
        }
    };

    spawn_janitor(state.clone());

    let app = mirror_server::build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {addr}: {e}"));
    info!("listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.unwrap();
    })
    .await
    .unwrap();
}
