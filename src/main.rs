use std::env;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use pokegpt_backend::core::logging;
use pokegpt_backend::core::security::session_token_path;
use pokegpt_backend::core::config::AppPaths;
use pokegpt_backend::server;
use pokegpt_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = AppPaths::new();
    logging::init(&paths.log_dir, "server.log");

    let state = AppState::initialize().await?;
    tracing::info!(
        "Config routes require x-api-key; token file: {}",
        session_token_path(&state.paths).display()
    );

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(state.settings.server.port);
    let bind_addr = format!("{}:{}", state.settings.server.host, port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    println!("POKEGPT_PORT={}", addr.port());
    tracing::info!("Listening on {}", addr);

    let app: Router = server::router::router(state);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
