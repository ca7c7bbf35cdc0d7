//! Parlance server binary.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use parlance_identity::IdentityStore;
use parlance_server::{router, AppState};
use parlance_types::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(
        bind = %settings.bind_addr,
        asr = settings.asr_configured(),
        llm = settings.llm_configured(),
        tts = settings.tts_configured(),
        "starting parlance server"
    );

    let identity = Arc::new(IdentityStore::open(&settings.identity_dir)?);
    let bind_addr = settings.bind_addr.clone();
    let state = Arc::new(AppState { settings, identity });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
