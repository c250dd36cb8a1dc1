//! Core types used throughout RateBridge
//!
//! Defines the tick value flowing through the pipeline and helpers for
//! working with feed-qualified rate names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One bid/ask observation for a currency pair.
///
/// Immutable once constructed; the timestamp is the feed's quote time for
/// raw ticks and the computation instant for derived ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(bid: f64, ask: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            bid,
            ask,
            timestamp,
        }
    }

    /// Tick stamped with the current instant.
    pub fn now(bid: f64, ask: f64) -> Self {
        Self::new(bid, ask, Utc::now())
    }

    /// Both sides are finite numbers. Non-finite ticks are rejected at the
    /// wire boundary and never enter the table.
    pub fn is_finite(&self) -> bool {
        self.bid.is_finite() && self.ask.is_finite()
    }

    /// Both sides are strictly positive, the precondition for using this
    /// tick in an inversion or average.
    pub fn is_positive(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0
    }

    /// Invert the quoted pair: bid and ask swap roles and reciprocate,
    /// preserving the bid <= ask ordering convention. Stamped now, since the
    /// inverted value is a fresh computation.
    pub fn invert(&self) -> Self {
        Self::now(1.0 / self.ask, 1.0 / self.bid)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bid={} ask={} ts={}", self.bid, self.ask, self.timestamp)
    }
}

/// Connection lifecycle of a collector instance.
///
/// `ConnectFailed` and `Disconnected` are terminal for the instance;
/// recovery is an external supervision concern, collectors do not reconnect
/// themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ConnectFailed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::ConnectFailed => write!(f, "connect-failed"),
        }
    }
}

/// Strip the feed qualification from a rate name: `PF1_USDTRY` -> `USDTRY`.
/// Bare names pass through unchanged.
pub fn strip_feed_prefix(rate_name: &str) -> &str {
    match rate_name.split_once('_') {
        Some((_, bare)) => bare,
        None => rate_name,
    }
}

/// Split a bare pair into its 3-character base and quote codes.
/// Returns `None` for anything that is not exactly two codes.
pub fn split_pair(bare: &str) -> Option<(&str, &str)> {
    if bare.len() == 6 && bare.is_ascii() {
        Some(bare.split_at(3))
    } else {
        None
    }
}

/// Swap base and quote of a bare 6-character pair.
pub fn invert_pair(bare: &str) -> Option<String> {
    split_pair(bare).map(|(base, quote)| format!("{}{}", quote, base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_is_self_inverse() {
        let tick = Tick::now(40.50, 40.55);
        let back = tick.invert().invert();
        assert!((back.bid - tick.bid).abs() < 1e-9);
        assert!((back.ask - tick.ask).abs() < 1e-9);
    }

    #[test]
    fn invert_preserves_bid_ask_ordering() {
        let tick = Tick::now(40.50, 40.55);
        let inv = tick.invert();
        assert!(inv.bid <= inv.ask);
        assert!((inv.bid - 1.0 / 40.55).abs() < 1e-12);
        assert!((inv.ask - 1.0 / 40.50).abs() < 1e-12);
    }

    #[test]
    fn strips_feed_prefix() {
        assert_eq!(strip_feed_prefix("PF1_USDTRY"), "USDTRY");
        assert_eq!(strip_feed_prefix("USDTRY"), "USDTRY");
    }

    #[test]
    fn splits_six_char_pairs_only() {
        assert_eq!(split_pair("USDTRY"), Some(("USD", "TRY")));
        assert_eq!(split_pair("USD"), None);
        assert_eq!(split_pair("USDTRYX"), None);
    }

    #[test]
    fn inverts_pair_name() {
        assert_eq!(invert_pair("USDTRY").as_deref(), Some("TRYUSD"));
        assert_eq!(invert_pair("bad"), None);
    }
}
