//! Dispatcher - the single point where ticks become side effects
//!
//! Implements the listener contract consumed by every collector. Each tick
//! is stored and published raw, written into the subscriber's rate table,
//! and then the derivation engine runs over a snapshot of that whole table
//! so cross and inverse results can combine entries from several feeds.
//! Everything here is fail-soft: a sink or derivation problem is logged with
//! the offending rate name and never reaches the feed's ingestion task.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

use crate::calc::DerivationEngine;
use crate::feed::RateListener;
use crate::sink::Sink;
use crate::table::RateTable;
use crate::types::Tick;

pub struct Dispatcher {
    sink: Arc<dyn Sink>,
    engine: DerivationEngine,
    // Per-subscriber partitions behind their own locks; no lock is ever
    // held across an await or across subscriber boundaries.
    tables: RwLock<HashMap<String, Arc<Mutex<RateTable>>>>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn Sink>, engine: DerivationEngine) -> Self {
        Self {
            sink,
            engine,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// The table partition for a subscriber, created on first use.
    fn table_for(&self, subscriber_id: &str) -> Arc<Mutex<RateTable>> {
        if let Some(table) = self
            .tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(subscriber_id)
        {
            return Arc::clone(table);
        }
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            tables
                .entry(subscriber_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(RateTable::new()))),
        )
    }

    /// Current contents of a subscriber's table, if it has one.
    pub fn table_snapshot(&self, subscriber_id: &str) -> Option<RateTable> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(subscriber_id)
            .map(|table| table.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn fan_out(&self, key: &str, tick: &Tick) {
        if let Err(e) = self.sink.store(key, tick).await {
            warn!(key = %key, error = %e, "sink store failed");
        }
        if let Err(e) = self.sink.publish(key, tick).await {
            warn!(key = %key, error = %e, "sink publish failed");
        }
    }
}

#[async_trait]
impl RateListener for Dispatcher {
    async fn on_connect(&self, platform: &str, status: bool) {
        info!(platform = %platform, status = status, "feed connect");
    }

    async fn on_disconnect(&self, platform: &str, status: bool) {
        info!(platform = %platform, status = status, "feed disconnect");
    }

    async fn on_rate_available(
        &self,
        subscriber_id: &str,
        platform: &str,
        rate_name: &str,
        tick: Tick,
    ) {
        info!(subscriber = %subscriber_id, platform = %platform, rate = %rate_name, "rate available");
        self.on_rate_update(subscriber_id, platform, rate_name, tick)
            .await;
    }

    async fn on_rate_update(
        &self,
        subscriber_id: &str,
        platform: &str,
        rate_name: &str,
        tick: Tick,
    ) {
        info!(
            subscriber = %subscriber_id,
            platform = %platform,
            rate = %rate_name,
            %tick,
            "rate update"
        );

        let raw_key = format!("raw:{subscriber_id}:{rate_name}");
        self.fan_out(&raw_key, &tick).await;

        let snapshot = {
            let table = self.table_for(subscriber_id);
            let mut guard = table.lock().unwrap_or_else(|e| e.into_inner());
            guard.insert(rate_name.to_string(), tick);
            guard.clone()
        };

        let derived = self.engine.derive(&snapshot);
        let mut results: Vec<(String, Tick)> = derived.into_iter().collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));

        for (pair, derived_tick) in results {
            let calc_key = format!("calc:{subscriber_id}:{pair}");
            self.fan_out(&calc_key, &derived_tick).await;
        }
    }

    async fn on_rate_status(&self, platform: &str, rate_name: &str, status: &str) {
        info!(platform = %platform, rate = %rate_name, status = %status, "rate status");
    }
}
