//! trialscope-server: Axum web server exposing comparison views over REST and SSE.

pub mod api;
pub mod state;

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use trialscope_core::MasterClient;

use crate::state::AppState;

pub use state::ServerConfig;

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api::router())
        .with_state(state)
        .layer(cors)
}

/// Start the server on the configured address, backed by the configured master.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let client = MasterClient::new(&config.scope.master_url, config.scope.auth_token.clone());
    let state = AppState::new(Arc::new(client), config.scope.clone());
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host(), config.port()).parse()?;
    info!(master = %config.scope.master_url, "trialscope server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
