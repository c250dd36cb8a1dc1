//! Per-subscriber rate table
//!
//! Maps feed-qualified rate names to the latest tick seen from any feed.
//! Entries are overwritten in place and never deleted during normal
//! operation, so the table is bounded by the number of distinct
//! feed x rate pairs a subscriber ever sees.

use std::collections::{BTreeSet, HashMap};

use crate::types::{split_pair, strip_feed_prefix, Tick};

#[derive(Debug, Clone, Default)]
pub struct RateTable {
    entries: HashMap<String, Tick>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the latest tick for a feed-qualified rate name.
    pub fn insert(&mut self, rate_name: impl Into<String>, tick: Tick) {
        self.entries.insert(rate_name.into(), tick);
    }

    pub fn get(&self, rate_name: &str) -> Option<&Tick> {
        self.entries.get(rate_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tick)> {
        self.entries.iter()
    }

    /// All ticks stored for a bare pair, across every feed qualification.
    /// A bare entry for the pair itself counts as one variant.
    pub fn variants(&self, bare_pair: &str) -> Vec<&Tick> {
        let suffix = format!("_{bare_pair}");
        self.entries
            .iter()
            .filter(|(name, _)| name.as_str() == bare_pair || name.ends_with(&suffix))
            .map(|(_, tick)| tick)
            .collect()
    }

    /// Distinct bare pairs implied by the table keys, in sorted order so
    /// derivation output is deterministic. Keys that do not strip down to
    /// exactly two 3-character codes are skipped.
    pub fn bare_pairs(&self) -> Vec<String> {
        let pairs: BTreeSet<String> = self
            .entries
            .keys()
            .filter_map(|name| {
                let bare = strip_feed_prefix(name);
                split_pair(bare).map(|_| bare.to_string())
            })
            .collect();
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrites_in_place() {
        let mut table = RateTable::new();
        table.insert("PF1_USDTRY", Tick::now(40.50, 40.55));
        table.insert("PF1_USDTRY", Tick::now(40.51, 40.56));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("PF1_USDTRY").unwrap().bid, 40.51);
    }

    #[test]
    fn variants_matches_all_feed_qualifications() {
        let mut table = RateTable::new();
        table.insert("PF1_USDTRY", Tick::now(40.50, 40.55));
        table.insert("PF2_USDTRY", Tick::now(40.60, 40.65));
        table.insert("PF1_EURTRY", Tick::now(47.31, 47.32));
        assert_eq!(table.variants("USDTRY").len(), 2);
        assert_eq!(table.variants("EURTRY").len(), 1);
        assert!(table.variants("GBPTRY").is_empty());
    }

    #[test]
    fn bare_pairs_dedups_and_sorts() {
        let mut table = RateTable::new();
        table.insert("PF2_USDTRY", Tick::now(40.60, 40.65));
        table.insert("PF1_USDTRY", Tick::now(40.50, 40.55));
        table.insert("PF1_EURTRY", Tick::now(47.31, 47.32));
        table.insert("PF1_STATUS", Tick::now(1.0, 1.0));
        // STATUS is six chars so it still parses as a pair; a short key does not
        table.insert("PF1_XAU", Tick::now(1.0, 1.0));
        assert_eq!(table.bare_pairs(), vec!["EURTRY", "STATUS", "USDTRY"]);
    }
}
