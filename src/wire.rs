//! Wire formats shared with the feeds and downstream consumers
//!
//! Two pipe-delimited shapes live here: the persisted raw value written to
//! sinks (`"<rateName>|<bid>|<ask>|<timestamp>"`, kept for legacy consumer
//! compatibility) and the line-protocol data record emitted by the
//! persistent-connection feed (`"<RATE>|22:number:<bid>|25:number:<ask>|
//! 5:timestamp:<ts>"`). Legacy feeds stamp ticks with naive local datetimes
//! and comma decimal separators, so parsing here is deliberately forgiving.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::types::Tick;

/// Timestamp patterns accepted from feeds that do not speak RFC 3339.
/// Naive datetimes are taken as UTC.
const NAIVE_TIMESTAMP_PATTERNS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y%m%d-%H:%M:%S%.f",
];

/// Parse a feed timestamp, falling back through the legacy patterns and
/// finally epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    for pattern in NAIVE_TIMESTAMP_PATTERNS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, pattern) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(millis) = raw.parse::<i64>() {
        if let Some(ts) = DateTime::from_timestamp_millis(millis) {
            return Ok(ts);
        }
    }

    bail!("unrecognized timestamp: {raw:?}")
}

/// Encode a tick in the persisted raw value format.
pub fn encode_raw(rate_name: &str, tick: &Tick) -> String {
    format!(
        "{}|{}|{}|{}",
        rate_name,
        tick.bid,
        tick.ask,
        tick.timestamp.to_rfc3339()
    )
}

/// Decode a persisted raw value back into its rate name and tick.
pub fn parse_raw(value: &str) -> Result<(String, Tick)> {
    let fields: Vec<&str> = value.split('|').collect();
    if fields.len() != 4 {
        bail!("expected 4 pipe-delimited fields, got {}", fields.len());
    }

    let bid: f64 = fields[1]
        .trim()
        .parse()
        .with_context(|| format!("bad bid field {:?}", fields[1]))?;
    let ask: f64 = fields[2]
        .trim()
        .parse()
        .with_context(|| format!("bad ask field {:?}", fields[2]))?;
    let timestamp = parse_timestamp(fields[3])?;

    let tick = Tick::new(bid, ask, timestamp);
    if !tick.is_finite() {
        bail!("non-finite bid/ask in {value:?}");
    }

    Ok((fields[0].to_string(), tick))
}

/// Parse one data line from the line-protocol feed.
///
/// Fields after the rate name are `<tag>:<type>:<value>` triples; only the
/// value matters here. Numeric values may use a comma decimal separator.
pub fn parse_line_record(line: &str) -> Result<(String, Tick)> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 4 {
        bail!("expected at least 4 pipe-delimited fields, got {}", fields.len());
    }

    let rate_name = fields[0].trim();
    if rate_name.is_empty() {
        bail!("empty rate name in line {line:?}");
    }

    let bid = parse_tagged_number(fields[1])
        .with_context(|| format!("bad bid field {:?}", fields[1]))?;
    let ask = parse_tagged_number(fields[2])
        .with_context(|| format!("bad ask field {:?}", fields[2]))?;
    let timestamp = parse_timestamp(tagged_value(fields[3]))
        .with_context(|| format!("bad timestamp field {:?}", fields[3]))?;

    let tick = Tick::new(bid, ask, timestamp);
    if !tick.is_finite() {
        bail!("non-finite bid/ask in line {line:?}");
    }

    Ok((rate_name.to_string(), tick))
}

/// Extract the value of a `<tag>:<type>:<value>` field. The value itself may
/// contain colons (timestamps do), so only the first two are separators.
fn tagged_value(field: &str) -> &str {
    let mut rest = field;
    for _ in 0..2 {
        match rest.split_once(':') {
            Some((_, tail)) => rest = tail,
            None => break,
        }
    }
    rest
}

fn parse_tagged_number(field: &str) -> Result<f64> {
    let value = tagged_value(field).trim().replace(',', ".");
    value
        .parse::<f64>()
        .with_context(|| format!("not a number: {value:?}"))
}
