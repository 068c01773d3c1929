use anyhow::Context;
use legal_chat_server::{create_app, init_tracing, AppState};
use legal_rag::{LocalModelLoader, Settings};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = Settings::load().context("Invalid configuration")?;
    settings
        .ensure_dirs()
        .context("Failed to create data directories")?;

    tracing::info!(
        app = %settings.app_name,
        version = %settings.app_version,
        source_docs = %settings.paths.source_docs_dir.display(),
        vector_store = %settings.paths.vector_store_dir.display(),
        model = %settings.model_path().display(),
        "Starting"
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let state = AppState::new(settings, Arc::new(LocalModelLoader));
    state.try_init().await;

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Private Legal Chat API listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
