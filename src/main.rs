use std::net::SocketAddr;

use prompt_to_comic::routes::{router, AppState};
use prompt_to_comic::{ComicPipeline, Settings};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let settings = Settings::from_env()?;
    let pipeline = ComicPipeline::from_settings(&settings)?;
    if let Some(key) = settings.openai_api_key.as_deref() {
        tracing::info!("Using API key: {}***", key.chars().take(3).collect::<String>());
    }

    let app = router(AppState::new(pipeline, &settings));

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    tracing::info!(%addr, panels = ?settings.panel_range(), max_jobs = settings.max_concurrent_jobs, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
