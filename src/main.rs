//! RateBridge entrypoint
//!
//! Bootstraps the pipeline: logging, configuration, formula set, sink and
//! dispatcher, then starts every configured subscriber and runs until
//! ctrl-c.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratebridge::calc::{DerivationEngine, FormulaSet};
use ratebridge::config::AppConfig;
use ratebridge::dispatch::Dispatcher;
use ratebridge::feed::RateListener;
use ratebridge::sink::{LogSink, MemorySink, Sink};
use ratebridge::subscriber::start_subscribers;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::load()?;
    info!(config = %cfg.digest(), "starting ratebridge");

    let formulas = FormulaSet::load(&cfg.pipeline.formulas_path)
        .with_context(|| format!("loading formulas from {}", cfg.pipeline.formulas_path))?;
    info!(groups = formulas.len(), "loaded formula set");

    let sink: Arc<dyn Sink> = match cfg.pipeline.sink.as_str() {
        "memory" => Arc::new(MemorySink::new()),
        _ => Arc::new(LogSink::new()),
    };
    let engine = DerivationEngine::new(formulas, cfg.pipeline.anchors.clone());
    let dispatcher = Arc::new(Dispatcher::new(sink, engine));
    let listener: Arc<dyn RateListener> = dispatcher.clone();

    let subscribers = start_subscribers(&cfg, listener).await?;
    info!(count = subscribers.len(), "system started, waiting for rate updates");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    for subscriber in subscribers {
        subscriber.shutdown().await;
    }
    info!("all subscribers stopped");

    Ok(())
}
