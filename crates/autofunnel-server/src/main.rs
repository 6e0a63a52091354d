use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use autofunnel_server::state::AppState;

/// `autofunnel health`: liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$AUTOFUNNEL_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("AUTOFUNNEL_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("autofunnel=info".parse()?),
        )
        .json()
        .init();

    let cfg = autofunnel_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/autofunnel.db", cfg.data_dir);

    // Open DuckDB and create the journey and tracking tables if missing.
    let db = autofunnel_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    let state = Arc::new(AppState::new(db, cfg.clone())?);
    info!(sinks = ?state.forwarder.sink_names(), "Conversion sinks ready");

    // Register active journeys once the configured delay has passed.
    tokio::spawn(Arc::clone(&state).run_startup_registration());

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = autofunnel_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, "Autofunnel listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
