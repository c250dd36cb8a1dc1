//! Feed layer - collectors, events and the listener seam
//!
//! Collectors push `FeedEvent`s into a per-subscriber channel; the event
//! pump drains that channel on its own task and translates events into
//! `RateListener` calls. One pump per subscriber means every callback for a
//! subscriber runs on a single task, which is what linearizes table updates
//! without a lock held across feeds.

pub mod collector;
pub mod sources;

pub use collector::{build_collector, CollectorKind, RateCollector};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

use crate::types::Tick;

/// Events emitted by collectors.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Connection attempt finished; `status` is false on failure.
    Connected { platform: String, status: bool },
    /// Channel closed; `status` is true for a clean shutdown.
    Disconnected { platform: String, status: bool },
    /// First arrival of a subscribed rate.
    RateAvailable {
        subscriber_id: String,
        platform: String,
        rate_name: String,
        tick: Tick,
    },
    /// Subsequent update of a subscribed rate.
    RateUpdate {
        subscriber_id: String,
        platform: String,
        rate_name: String,
        tick: Tick,
    },
    /// Control or heartbeat message concerning a rate.
    RateStatus {
        platform: String,
        rate_name: String,
        status: String,
    },
}

/// Callback contract consumed by every collector, implemented by the
/// dispatcher. Implementations must be fail-soft: nothing here may panic or
/// propagate an error back into a feed's ingestion task.
#[async_trait]
pub trait RateListener: Send + Sync {
    async fn on_connect(&self, platform: &str, status: bool);
    async fn on_disconnect(&self, platform: &str, status: bool);
    async fn on_rate_available(
        &self,
        subscriber_id: &str,
        platform: &str,
        rate_name: &str,
        tick: Tick,
    );
    async fn on_rate_update(
        &self,
        subscriber_id: &str,
        platform: &str,
        rate_name: &str,
        tick: Tick,
    );
    async fn on_rate_status(&self, platform: &str, rate_name: &str, status: &str);
}

/// Drain a subscriber's event channel into the listener until every sender
/// is dropped. Events are delivered in channel order, so a disconnect
/// notification queued after the ingestion task stopped is guaranteed to be
/// the last thing the listener sees from that collector.
pub async fn pump_events(mut rx: Receiver<FeedEvent>, listener: Arc<dyn RateListener>) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Connected { platform, status } => {
                listener.on_connect(&platform, status).await;
            }
            FeedEvent::Disconnected { platform, status } => {
                listener.on_disconnect(&platform, status).await;
            }
            FeedEvent::RateAvailable {
                subscriber_id,
                platform,
                rate_name,
                tick,
            } => {
                listener
                    .on_rate_available(&subscriber_id, &platform, &rate_name, tick)
                    .await;
            }
            FeedEvent::RateUpdate {
                subscriber_id,
                platform,
                rate_name,
                tick,
            } => {
                listener
                    .on_rate_update(&subscriber_id, &platform, &rate_name, tick)
                    .await;
            }
            FeedEvent::RateStatus {
                platform,
                rate_name,
                status,
            } => {
                listener.on_rate_status(&platform, &rate_name, &status).await;
            }
        }
    }
}
