//! Persistent-connection line-protocol collector
//!
//! Speaks the legacy pipe-delimited protocol over a long-lived TCP
//! connection: outbound control messages `subscribe|<RATE>` and
//! `unsubscribe|<RATE>`, inbound tick records parsed by `wire`, plus control
//! replies (`Subscribed ...`, `Unsubscribed ...`, `ERROR|...`) which are
//! forwarded as rate-status events. A dedicated task owns the read half of
//! the socket for the life of the connection.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::LineFeedConfig;
use crate::feed::{FeedEvent, RateCollector};
use crate::types::{ConnectionState, Tick};
use crate::wire;

pub struct LineProtocolCollector {
    cfg: LineFeedConfig,
    subscriber_id: String,
    tx: Sender<FeedEvent>,
    state: ConnectionState,
    writer: Option<OwnedWriteHalf>,
    read_task: Option<JoinHandle<()>>,
    subscriptions: HashSet<String>,
}

impl LineProtocolCollector {
    pub fn new(cfg: LineFeedConfig, subscriber_id: String, tx: Sender<FeedEvent>) -> Self {
        Self {
            cfg,
            subscriber_id,
            tx,
            state: ConnectionState::Disconnected,
            writer: None,
            read_task: None,
            subscriptions: HashSet::new(),
        }
    }

    async fn send_control(&mut self, message: &str) -> Result<()> {
        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => bail!("collector is not connected"),
        };
        writer
            .write_all(format!("{message}\n").as_bytes())
            .await
            .context("failed to send control message")?;
        Ok(())
    }
}

#[async_trait]
impl RateCollector for LineProtocolCollector {
    async fn connect(&mut self, platform: &str, _user: &str, _password: &str) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let address = format!("{}:{}", self.cfg.host, self.cfg.port);
        info!(platform = %platform, subscriber = %self.subscriber_id, address = %address, "connecting line-protocol feed");

        let connect = tokio::time::timeout(
            Duration::from_millis(self.cfg.connect_timeout_ms),
            TcpStream::connect(&address),
        )
        .await;

        let stream = match connect {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::ConnectFailed;
                error!(platform = %platform, address = %address, error = %e, "connection failed");
                let _ = self
                    .tx
                    .send(FeedEvent::Connected {
                        platform: platform.to_string(),
                        status: false,
                    })
                    .await;
                return Err(e).context("failed to connect line-protocol feed");
            }
            Err(_) => {
                self.state = ConnectionState::ConnectFailed;
                error!(platform = %platform, address = %address, "connection timed out");
                let _ = self
                    .tx
                    .send(FeedEvent::Connected {
                        platform: platform.to_string(),
                        status: false,
                    })
                    .await;
                bail!("timed out connecting to {address}");
            }
        };

        let (read_half, write_half) = stream.into_split();
        self.writer = Some(write_half);
        self.state = ConnectionState::Connected;

        let _ = self
            .tx
            .send(FeedEvent::Connected {
                platform: platform.to_string(),
                status: true,
            })
            .await;
        info!(platform = %platform, subscriber = %self.subscriber_id, "connected");

        self.read_task = Some(tokio::spawn(read_loop(
            read_half,
            self.tx.clone(),
            self.subscriber_id.clone(),
            platform.to_string(),
        )));

        Ok(())
    }

    async fn disconnect(&mut self, platform: &str, _user: &str, _password: &str) -> Result<()> {
        // Stop the reader before queueing the notification so no tick event
        // can follow the disconnect in channel order.
        if let Some(task) = self.read_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.writer = None;
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
        if self.subscriptions.contains(rate_name) {
            return Ok(());
        }
        self.send_control(&format!("subscribe|{rate_name}")).await?;
        self.subscriptions.insert(rate_name.to_string());
        info!(platform = %platform, rate = %rate_name, "sent subscribe request");
        Ok(())
    }

    async fn unsubscribe(&mut self, platform: &str, rate_name: &str) -> Result<()> {
        if !self.subscriptions.contains(rate_name) {
            return Ok(());
        }
        // Confirm the control send before forgetting the subscription, so a
        // failed send leaves it in place for a retry.
        self.send_control(&format!("unsubscribe|{rate_name}")).await?;
        self.subscriptions.remove(rate_name);
        info!(platform = %platform, rate = %rate_name, "sent unsubscribe request");
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Read lines until the peer closes the connection or the subscriber side
/// goes away. Malformed records are logged and dropped; they never stop the
/// loop.
async fn read_loop(
    read_half: OwnedReadHalf,
    tx: Sender<FeedEvent>,
    subscriber_id: String,
    platform: String,
) {
    let mut lines = BufReader::new(read_half).lines();
    let mut seen: HashSet<String> = HashSet::new();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(event) = classify_line(line, &subscriber_id, &platform, &mut seen) {
                    if tx.send(event).await.is_err() {
                        // Subscriber gone; nothing left to deliver to.
                        return;
                    }
                }
            }
            Ok(None) => {
                warn!(platform = %platform, subscriber = %subscriber_id, "feed closed the connection");
                let _ = tx
                    .send(FeedEvent::Disconnected {
                        platform,
                        status: false,
                    })
                    .await;
                return;
            }
            Err(e) => {
                warn!(platform = %platform, subscriber = %subscriber_id, error = %e, "read error on feed connection");
                let _ = tx
                    .send(FeedEvent::Disconnected {
                        platform,
                        status: false,
                    })
                    .await;
                return;
            }
        }
    }
}

/// Turn one inbound line into an event, or `None` for lines to drop.
fn classify_line(
    line: &str,
    subscriber_id: &str,
    platform: &str,
    seen: &mut HashSet<String>,
) -> Option<FeedEvent> {
    if line.starts_with("Subscribed")
        || line.starts_with("Unsubscribed")
        || line.starts_with("ERROR")
    {
        debug!(platform = %platform, message = %line, "control message");
        let rate_name = line
            .rsplit([' ', '|'])
            .next()
            .unwrap_or_default()
            .to_string();
        return Some(FeedEvent::RateStatus {
            platform: platform.to_string(),
            rate_name,
            status: line.to_string(),
        });
    }

    match wire::parse_line_record(line) {
        Ok((rate_name, tick)) => Some(tick_event(
            subscriber_id,
            platform,
            rate_name,
            tick,
            seen,
        )),
        Err(e) => {
            warn!(platform = %platform, line = %line, error = %e, "dropping malformed tick");
            None
        }
    }
}

fn tick_event(
    subscriber_id: &str,
    platform: &str,
    rate_name: String,
    tick: Tick,
    seen: &mut HashSet<String>,
) -> FeedEvent {
    let first_arrival = seen.insert(rate_name.clone());
    if first_arrival {
        FeedEvent::RateAvailable {
            subscriber_id: subscriber_id.to_string(),
            platform: platform.to_string(),
            rate_name,
            tick,
        }
    } else {
        FeedEvent::RateUpdate {
            subscriber_id: subscriber_id.to_string(),
            platform: platform.to_string(),
            rate_name,
            tick,
        }
    }
}
