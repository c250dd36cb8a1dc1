//! Stateless REST polling collector
//!
//! Polls `<base_url>/api/rates/<rateName>` for every rate in the interest
//! set, sequentially within one cycle, then sleeps a fixed interval.
//! Subscribe and unsubscribe mutate the interest set consulted by the
//! polling task; there is no control channel to the feed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RestFeedConfig;
use crate::feed::{FeedEvent, RateCollector};
use crate::types::{ConnectionState, Tick};
use crate::wire;

/// Payload returned by the feed's rate endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateResponse {
    rate_name: String,
    bid: f64,
    ask: f64,
    timestamp: String,
}

pub struct RestPollingCollector {
    cfg: RestFeedConfig,
    subscriber_id: String,
    tx: Sender<FeedEvent>,
    state: ConnectionState,
    interest: Arc<Mutex<HashSet<String>>>,
    poll_task: Option<JoinHandle<()>>,
}

impl RestPollingCollector {
    pub fn new(cfg: RestFeedConfig, subscriber_id: String, tx: Sender<FeedEvent>) -> Self {
        Self {
            cfg,
            subscriber_id,
            tx,
            state: ConnectionState::Disconnected,
            interest: Arc::new(Mutex::new(HashSet::new())),
            poll_task: None,
        }
    }
}

#[async_trait]
impl RateCollector for RestPollingCollector {
    async fn connect(&mut self, platform: &str, user: &str, _password: &str) -> Result<()> {
        self.state = ConnectionState::Connecting;

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_millis(self.cfg.request_timeout_ms))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                self.state = ConnectionState::ConnectFailed;
                error!(platform = %platform, error = %e, "failed to build HTTP client");
                let _ = self
                    .tx
                    .send(FeedEvent::Connected {
                        platform: platform.to_string(),
                        status: false,
                    })
                    .await;
                return Err(e).context("failed to build HTTP client");
            }
        };

        self.state = ConnectionState::Connected;
        let _ = self
            .tx
            .send(FeedEvent::Connected {
                platform: platform.to_string(),
                status: true,
            })
            .await;
        info!(
            platform = %platform,
            subscriber = %self.subscriber_id,
            user = %user,
            base_url = %self.cfg.base_url,
            "connected (REST polling mode)"
        );

        self.poll_task = Some(tokio::spawn(poll_loop(
            client,
            self.cfg.clone(),
            Arc::clone(&self.interest),
            self.tx.clone(),
            self.subscriber_id.clone(),
            platform.to_string(),
        )));

        Ok(())
    }

    async fn disconnect(&mut self, platform: &str, _user: &str, _password: &str) -> Result<()> {
        if let Some(task) = self.poll_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.state = ConnectionState::Disconnected;

        let _ = self
            .tx
            .send(FeedEvent::Disconnected {
                platform: platform.to_string(),
                status: true,
            })
            .await;
        info!(platform = %platform, subscriber = %self.subscriber_id, "disconnected");
        Ok(())
    }

    async fn subscribe(&mut self, platform: &str, rate_name: &str) -> Result<()> {
        let inserted = self
            .interest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rate_name.to_string());
        if inserted {
            info!(platform = %platform, rate = %rate_name, "subscribed");
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, platform: &str, rate_name: &str) -> Result<()> {
        let removed = self
            .interest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(rate_name);
        if removed {
            info!(platform = %platform, rate = %rate_name, "unsubscribed");
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

/// One polling cycle per interval: snapshot the interest set, poll each rate
/// with a bounded-timeout request, emit whatever parses. Poll failures are
/// logged and skipped; the loop only ends when the task is aborted or the
/// subscriber goes away.
async fn poll_loop(
    client: reqwest::Client,
    cfg: RestFeedConfig,
    interest: Arc<Mutex<HashSet<String>>>,
    tx: Sender<FeedEvent>,
    subscriber_id: String,
    platform: String,
) {
    let mut seen: HashSet<String> = HashSet::new();

    loop {
        let rates: Vec<String> = {
            let guard = interest.lock().unwrap_or_else(|e| e.into_inner());
            guard.iter().cloned().collect()
        };

        for rate_name in rates {
            match poll_rate(&client, &cfg.base_url, &rate_name).await {
                Ok((name, tick)) => {
                    let first_arrival = seen.insert(name.clone());
                    let event = if first_arrival {
                        FeedEvent::RateAvailable {
                            subscriber_id: subscriber_id.clone(),
                            platform: platform.clone(),
                            rate_name: name,
                            tick,
                        }
                    } else {
                        FeedEvent::RateUpdate {
                            subscriber_id: subscriber_id.clone(),
                            platform: platform.clone(),
                            rate_name: name,
                            tick,
                        }
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(platform = %platform, rate = %rate_name, error = %e, "poll failed");
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(cfg.poll_interval_ms)).await;
    }
}

async fn poll_rate(
    client: &reqwest::Client,
    base_url: &str,
    rate_name: &str,
) -> Result<(String, Tick)> {
    let url = format!("{base_url}/api/rates/{rate_name}");
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    if !response.status().is_success() {
        anyhow::bail!("feed returned {}", response.status());
    }

    let payload: RateResponse = response
        .json()
        .await
        .context("failed to parse rate payload")?;

    let timestamp = wire::parse_timestamp(&payload.timestamp)?;
    let tick = Tick::new(payload.bid, payload.ask, timestamp);
    if !tick.is_finite() {
        warn!(rate = %payload.rate_name, "dropping non-finite tick");
        anyhow::bail!("non-finite bid/ask");
    }

    Ok((payload.rate_name, tick))
}
