//! One-shot ingestion of the source document directory.

use anyhow::Context;
use legal_chat_server::init_tracing;
use legal_rag::{Components, LocalModelLoader, ModelCache, ModelLoader, Settings};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = Settings::load().context("Invalid configuration")?;
    settings
        .ensure_dirs()
        .context("Failed to create data directories")?;

    let loader: Arc<dyn ModelLoader> = Arc::new(LocalModelLoader);
    let cache = ModelCache::new();
    let ingestor = Components::ingestor(&settings, &loader, &cache).await?;
    let report = ingestor
        .ingest_directory(&settings.paths.source_docs_dir)
        .await?;

    if report.documents == 0 {
        println!("No documents found in {}", settings.paths.source_docs_dir.display());
    } else {
        println!(
            "Ingested {} files ({} records, {} chunks) in {} ms into {}",
            report.files,
            report.documents,
            report.chunks,
            report.duration_ms,
            settings.paths.vector_store_dir.display()
        );
    }
    Ok(())
}
