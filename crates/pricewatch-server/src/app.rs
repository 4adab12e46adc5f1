//! Wire library components together from a [`Config`].

use anyhow::{Context, Result};
use pricewatch::config::RendererKind;
use pricewatch::{
    BatchOrchestrator, ChromiumRenderer, Config, ExtractorConfig, HttpRenderer, PageExtractor,
    PostgrestStore, RecordStore, RecordSynchronizer, Renderer, RunLedger,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Start the configured renderer. Chromium launches a browser process here.
pub async fn build_renderer(config: &Config) -> Result<Arc<dyn Renderer>> {
    let renderer: Arc<dyn Renderer> = match config.renderer {
        RendererKind::Chromium => Arc::new(
            ChromiumRenderer::launch(&config.browser)
                .await
                .context("failed to launch Chrome; set PRICEWATCH_RENDERER=http to run without it")?,
        ),
        RendererKind::Http => Arc::new(HttpRenderer::new(&config.browser.user_agent)?),
    };
    info!(renderer = renderer.name(), "renderer ready");
    Ok(renderer)
}

/// The PostgREST store, when credentials are configured.
pub fn build_store(config: &Config) -> Result<Option<Arc<dyn RecordStore>>> {
    let Some(credentials) = &config.store else {
        return Ok(None);
    };
    let store = PostgrestStore::new(credentials).context("building record store client")?;
    Ok(Some(Arc::new(store)))
}

/// Build the orchestrator. With `require_store`, missing credentials are
/// fatal; otherwise the orchestrator runs observe-only when they are absent.
pub async fn build_orchestrator(config: &Config, require_store: bool) -> Result<BatchOrchestrator> {
    if require_store {
        config.require_store()?;
    }

    let renderer = build_renderer(config).await?;
    let extractor = PageExtractor::new(ExtractorConfig::from(config));
    let mut orchestrator = BatchOrchestrator::new(renderer, extractor);

    match build_store(config)? {
        Some(store) => {
            orchestrator = orchestrator.with_synchronizer(RecordSynchronizer::new(store));
        }
        None => info!("no store credentials; running observe-only"),
    }

    match RunLedger::open(&config.run_log) {
        Ok(ledger) => orchestrator = orchestrator.with_ledger(Arc::new(ledger)),
        Err(e) => warn!("run ledger disabled: {e:#}"),
    }

    Ok(orchestrator)
}
