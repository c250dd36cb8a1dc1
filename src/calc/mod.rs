//! Derivation engine
//!
//! Pure computation over a rate table snapshot: for every bare currency pair
//! implied by the table, evaluate the loaded direct, inverse and cross
//! formulas and collect whichever resolve. No I/O and no shared mutable
//! state; the dispatcher owns snapshotting and fan-out.

pub mod formula;

pub use formula::{Category, Expr, Formula, FormulaError, FormulaSet, Side};

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::table::RateTable;
use crate::types::{invert_pair, split_pair, Tick};

/// Freshly derived rates keyed by bare pair name. Transient, produced once
/// per ingestion event.
pub type DerivedRates = HashMap<String, Tick>;

pub struct DerivationEngine {
    formulas: FormulaSet,
    anchors: Vec<String>,
}

impl DerivationEngine {
    /// Build an engine over an immutable formula set. `anchors` is the list
    /// of intermediate currencies tried for cross rates, usually `["USD"]`.
    pub fn new(formulas: FormulaSet, anchors: Vec<String>) -> Self {
        Self { formulas, anchors }
    }

    /// Derive every resolvable rate from the given table snapshot.
    ///
    /// Pairs are visited in sorted order and categories in direct, inverse,
    /// cross order, so collisions between categories resolve
    /// deterministically (last writer wins). Yielding nothing is a normal
    /// outcome for a sparse table, not an error.
    pub fn derive(&self, table: &RateTable) -> DerivedRates {
        let mut result = DerivedRates::new();

        let resolve = |pair: &str, side: Side| -> Option<f64> {
            lookup_with_fallback(table, pair).map(|tick| match side {
                Side::Bid => tick.bid,
                Side::Ask => tick.ask,
            })
        };

        for pair in table.bare_pairs() {
            let Some((base, quote)) = split_pair(&pair) else {
                continue;
            };

            if let Some(formula) = self.formulas.get(Category::Direct) {
                if let Some(tick) = eval_sides(formula, base, quote, None, &resolve) {
                    debug!(pair = %pair, category = "direct", %tick, "derived rate");
                    result.insert(format!("{base}{quote}"), tick);
                }
            }

            if let Some(formula) = self.formulas.get(Category::Inverse) {
                if let Some(tick) = eval_sides(formula, base, quote, None, &resolve) {
                    debug!(pair = %pair, category = "inverse", %tick, "derived rate");
                    result.insert(format!("{quote}{base}"), tick);
                }
            }

            if let Some(formula) = self.formulas.get(Category::Cross) {
                for anchor in self.anchors.iter().map(String::as_str) {
                    // An anchor matching either leg degenerates into the
                    // direct or identity case; skip it.
                    if anchor == base || anchor == quote {
                        continue;
                    }
                    if let Some(tick) = eval_sides(formula, base, quote, Some(anchor), &resolve) {
                        debug!(pair = %pair, category = "cross", anchor = %anchor, %tick, "derived rate");
                        result.insert(format!("{base}{anchor}"), tick);
                    }
                }
            }
        }

        if result.is_empty() && !table.is_empty() {
            warn!(
                table_len = table.len(),
                "no derived rates resolvable from current table"
            );
        }

        result
    }
}

/// Evaluate both sides of a formula; a derived tick exists only when bid and
/// ask both resolve to strictly positive finite values. Derived ticks are
/// stamped with the computation instant, never an input timestamp.
fn eval_sides<F>(
    formula: &Formula,
    base: &str,
    quote: &str,
    anchor: Option<&str>,
    resolve: &F,
) -> Option<Tick>
where
    F: Fn(&str, Side) -> Option<f64>,
{
    let bid = formula.bid.evaluate(base, quote, anchor, resolve)?;
    let ask = formula.ask.evaluate(base, quote, anchor, resolve)?;
    let tick = Tick::now(bid, ask);
    (tick.is_finite() && tick.is_positive()).then_some(tick)
}

/// Resolve a bare pair from the table, trying in order:
/// 1. the per-side mean across all feed-qualified variants (two or more);
/// 2. the single feed-qualified variant, unmodified;
/// 3. the same search on the inverted pair, reciprocated with bid/ask
///    swapped;
/// each gated on strictly positive bid and ask. `None` means the pair is
/// unresolved from every feed, direct or inverted.
pub fn lookup_with_fallback(table: &RateTable, pair: &str) -> Option<Tick> {
    if let Some(tick) = find_average(table, pair) {
        if tick.is_positive() {
            return Some(tick);
        }
    }

    let inverse = invert_pair(pair)?;
    if let Some(tick) = find_average(table, &inverse) {
        if tick.is_positive() {
            return Some(tick.invert());
        }
    }

    None
}

fn find_average(table: &RateTable, pair: &str) -> Option<Tick> {
    let variants = table.variants(pair);
    match variants.len() {
        0 => None,
        1 => Some(variants[0].clone()),
        n => {
            let bid = variants.iter().map(|t| t.bid).sum::<f64>() / n as f64;
            let ask = variants.iter().map(|t| t.ask).sum::<f64>() / n as f64;
            Some(Tick::now(bid, ask))
        }
    }
}
