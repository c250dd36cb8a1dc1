//! RateBridge Library
//!
//! Rate aggregation and derivation pipeline: collects bid/ask ticks from
//! independent market-data feeds, derives indirectly-quoted currency pairs,
//! and fans raw and derived rates out to downstream sinks.

pub mod calc;
pub mod config;
pub mod dispatch;
pub mod feed;
pub mod sink;
pub mod subscriber;
pub mod table;
pub mod types;
pub mod wire;
