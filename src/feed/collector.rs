//! Collector capability contract and registry
//!
//! A collector owns one feed channel for one subscriber. The registry maps
//! the configuration-supplied kind tag onto the closed set of collector
//! implementations; there is no dynamic loading.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::Sender;

use crate::config::FeedsConfig;
use crate::feed::sources::{LineProtocolCollector, RestPollingCollector};
use crate::feed::FeedEvent;
use crate::types::ConnectionState;

/// Capability set every feed transport must satisfy so the dispatcher stays
/// agnostic of the wire protocol.
///
/// `connect` reports its outcome through the listener channel as well as its
/// return value and starts the ingestion task on success. `disconnect` stops
/// ingestion before queueing the disconnect notification, so no tick event
/// can follow it. Re-subscribing an active rate and unsubscribing an unknown
/// one are no-ops.
#[async_trait]
pub trait RateCollector: Send + Sync {
    async fn connect(&mut self, platform: &str, user: &str, password: &str) -> Result<()>;
    async fn disconnect(&mut self, platform: &str, user: &str, password: &str) -> Result<()>;
    async fn subscribe(&mut self, platform: &str, rate_name: &str) -> Result<()>;
    async fn unsubscribe(&mut self, platform: &str, rate_name: &str) -> Result<()>;
    fn state(&self) -> ConnectionState;
}

/// The closed set of collector implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorKind {
    /// Persistent-connection line protocol over TCP.
    Line,
    /// Stateless REST polling.
    Rest,
}

impl CollectorKind {
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "line" | "tcp" => Ok(CollectorKind::Line),
            "rest" | "poll" => Ok(CollectorKind::Rest),
            other => bail!("unknown collector kind {other:?} (expected line or rest)"),
        }
    }
}

/// Construct a collector of the given kind for one subscriber, wired to that
/// subscriber's event channel.
pub fn build_collector(
    kind: CollectorKind,
    feeds: &FeedsConfig,
    subscriber_id: &str,
    tx: Sender<FeedEvent>,
) -> Box<dyn RateCollector> {
    match kind {
        CollectorKind::Line => Box::new(LineProtocolCollector::new(
            feeds.line.clone(),
            subscriber_id.to_string(),
            tx,
        )),
        CollectorKind::Rest => Box::new(RestPollingCollector::new(
            feeds.rest.clone(),
            subscriber_id.to_string(),
            tx,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_kind_tags() {
        assert_eq!(CollectorKind::from_tag("line").unwrap(), CollectorKind::Line);
        assert_eq!(CollectorKind::from_tag("TCP").unwrap(), CollectorKind::Line);
        assert_eq!(CollectorKind::from_tag("rest").unwrap(), CollectorKind::Rest);
        assert!(CollectorKind::from_tag("reflection").is_err());
    }
}
