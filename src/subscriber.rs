//! Subscriber startup and shutdown
//!
//! A subscriber is one configured feed connection: a collector instance, the
//! event channel it writes into, and the pump task draining that channel
//! into the dispatcher. Startup mirrors the configuration file: build the
//! collector through the registry, connect, then subscribe every configured
//! rate.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::feed::{build_collector, pump_events, CollectorKind, RateCollector, RateListener};

pub struct Subscriber {
    pub id: String,
    platform: String,
    user: String,
    password: String,
    collector: Box<dyn RateCollector>,
    pump: JoinHandle<()>,
}

impl Subscriber {
    /// Disconnect the collector and wait for the event channel to drain.
    pub async fn shutdown(mut self) {
        if let Err(e) = self
            .collector
            .disconnect(&self.platform, &self.user, &self.password)
            .await
        {
            warn!(subscriber = %self.id, error = %e, "disconnect failed");
        }
        // Dropping the collector drops the last sender; the pump ends once
        // the queued events, disconnect notification last, are delivered.
        drop(self.collector);
        let _ = self.pump.await;
        info!(subscriber = %self.id, "stopped");
    }
}

/// Start every configured subscriber. A subscriber that fails to come up is
/// logged and skipped; the rest of the pipeline still runs.
pub async fn start_subscribers(
    cfg: &AppConfig,
    listener: Arc<dyn RateListener>,
) -> Result<Vec<Subscriber>> {
    let mut subscribers = Vec::new();

    for entry in &cfg.subscribers {
        let kind = match CollectorKind::from_tag(&entry.kind) {
            Ok(kind) => kind,
            Err(e) => {
                error!(subscriber = %entry.id, kind = %entry.kind, error = %e, "skipping subscriber");
                continue;
            }
        };

        info!(
            subscriber = %entry.id,
            platform = %entry.platform,
            kind = %entry.kind,
            rates = entry.rates.len(),
            "starting subscriber"
        );

        let (tx, rx) = mpsc::channel(cfg.pipeline.channel_capacity);
        let pump = tokio::spawn(pump_events(rx, Arc::clone(&listener)));
        let mut collector = build_collector(kind, &cfg.feeds, &entry.id, tx);

        if let Err(e) = collector
            .connect(&entry.platform, &entry.user, &entry.password)
            .await
        {
            error!(subscriber = %entry.id, platform = %entry.platform, error = %e, "connect failed, skipping subscriber");
            drop(collector);
            let _ = pump.await;
            continue;
        }

        for rate in &entry.rates {
            if let Err(e) = collector.subscribe(&entry.platform, rate).await {
                warn!(subscriber = %entry.id, rate = %rate, error = %e, "subscribe failed");
            }
        }

        subscribers.push(Subscriber {
            id: entry.id.clone(),
            platform: entry.platform.clone(),
            user: entry.user.clone(),
            password: entry.password.clone(),
            collector,
            pump,
        });
    }

    Ok(subscribers)
}
