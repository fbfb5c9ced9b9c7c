//! Axum-based API gateway for the governance and hydration backplane.
//! Config-driven via CoreConfig; every `/api` request passes the PDP
//! middleware before reaching a handler.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_core::{CoreConfig, Store};
use warden_gateway::{build_state, handlers, seed_defaults, spawn_workers};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warden=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoreConfig::from_env();
    let store = Store::open(&config.data_dir)?;
    let state = build_state(config, store)?;
    seed_defaults(&state)?;
    spawn_workers(&state);

    let app = handlers::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&state.config.gateway_addr).await?;
    info!(
        target: "warden::gateway",
        addr = %state.config.gateway_addr,
        "gateway listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
