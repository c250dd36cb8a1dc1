//! Sink interface for downstream fan-out
//!
//! The cache store and message bus are external collaborators reached
//! through this narrow interface. Keys follow `raw:<subscriberId>:<rateName>`
//! for ingested ticks and `calc:<subscriberId>:<pair>` for derived ticks;
//! values on the wire use the legacy pipe-delimited format from `wire`.
//! Implementations must be safe for concurrent use.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

use crate::types::Tick;
use crate::wire;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Persist the latest tick for a key in the cache store.
    async fn store(&self, key: &str, tick: &Tick) -> Result<()>;

    /// Publish the tick to the message bus under the same logical key.
    async fn publish(&self, key: &str, tick: &Tick) -> Result<()>;
}

/// Sink that logs every store and publish in the persisted wire format.
/// Stands in for the cache/bus pair in local runs.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for LogSink {
    async fn store(&self, key: &str, tick: &Tick) -> Result<()> {
        info!(key = %key, value = %wire::encode_raw(rate_name_of(key), tick), "store");
        Ok(())
    }

    async fn publish(&self, key: &str, tick: &Tick) -> Result<()> {
        info!(key = %key, value = %wire::encode_raw(rate_name_of(key), tick), "publish");
        Ok(())
    }
}

/// In-memory sink recording stores and publishes, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    stored: Mutex<HashMap<String, Tick>>,
    published: Mutex<Vec<(String, Tick)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self, key: &str) -> Option<Tick> {
        self.stored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn stored_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .stored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn published(&self) -> Vec<(String, Tick)> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn store(&self, key: &str, tick: &Tick) -> Result<()> {
        self.stored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), tick.clone());
        Ok(())
    }

    async fn publish(&self, key: &str, tick: &Tick) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key.to_string(), tick.clone()));
        Ok(())
    }
}

/// The rate name is the last segment of a `raw:`/`calc:` key.
fn rate_name_of(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or(key)
}
