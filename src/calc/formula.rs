//! Derivation formula set
//!
//! Formulas are loaded once at startup from a JSON document of the shape
//! `{"direct": {"bid": expr, "ask": expr}, "inverse": {...}, "cross": {...}}`
//! and parsed into small ASTs, so no string is re-parsed per tick.
//!
//! The expression grammar is tiny: a terminal is a pair template followed by
//! `_bid` or `_ask`, where the template mixes `{base}`, `{quote}` and
//! `{anchor}` placeholders with literal currency codes; a binary expression
//! is two sub-expressions joined by a single `/` or `*`. Expressions are
//! single-operator by construction; parenthesization is not part of the
//! grammar, which is a formula-authoring constraint.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormulaError {
    #[error("failed to read formula file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("formula document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown formula category {0:?} (expected direct, inverse or cross)")]
    UnknownCategory(String),
    #[error("category {category:?} is missing its {side} expression")]
    MissingSide { category: Category, side: Side },
    #[error("cannot parse expression {expr:?}: {reason}")]
    Parse { expr: String, reason: String },
}

/// Derivation category a formula belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Direct,
    Inverse,
    Cross,
}

impl Category {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "direct" => Some(Category::Direct),
            "inverse" => Some(Category::Inverse),
            "cross" => Some(Category::Cross),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Direct => write!(f, "direct"),
            Category::Inverse => write!(f, "inverse"),
            Category::Cross => write!(f, "cross"),
        }
    }
}

/// Which side of the quote a terminal reference reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Div,
    Mul,
}

/// One segment of a pair template: a placeholder or a literal run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Base,
    Quote,
    Anchor,
    Literal(String),
}

/// A pair name with placeholders, e.g. `{base}{quote}` or `{anchor}{quote}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairTemplate {
    segments: Vec<Segment>,
}

impl PairTemplate {
    fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = raw;
        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix('{') {
                let (name, after) = tail
                    .split_once('}')
                    .ok_or_else(|| format!("unterminated placeholder in {raw:?}"))?;
                let segment = match name {
                    "base" => Segment::Base,
                    "quote" => Segment::Quote,
                    "anchor" => Segment::Anchor,
                    other => return Err(format!("unknown placeholder {{{other}}}")),
                };
                segments.push(segment);
                rest = after;
            } else {
                let end = rest.find('{').unwrap_or(rest.len());
                segments.push(Segment::Literal(rest[..end].to_string()));
                rest = &rest[end..];
            }
        }
        if segments.is_empty() {
            return Err("empty pair reference".to_string());
        }
        Ok(Self { segments })
    }

    /// Render the template into a concrete bare pair name. `None` when the
    /// template needs an anchor and no anchor is in play.
    pub fn render(&self, base: &str, quote: &str, anchor: Option<&str>) -> Option<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Base => out.push_str(base),
                Segment::Quote => out.push_str(quote),
                Segment::Anchor => out.push_str(anchor?),
                Segment::Literal(text) => out.push_str(text),
            }
        }
        Some(out)
    }
}

/// Parsed expression tree. Built once at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lookup { pair: PairTemplate, side: Side },
    Binary {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Parse an expression string. The operator split is tried before the
    /// terminal suffix: a compound like `a_bid / b_ask` happens to end in
    /// `_ask` and must not be mistaken for a single terminal.
    pub fn parse(raw: &str) -> Result<Self, FormulaError> {
        Self::parse_inner(raw.trim()).map_err(|reason| FormulaError::Parse {
            expr: raw.to_string(),
            reason,
        })
    }

    fn parse_inner(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("empty expression".to_string());
        }

        for (symbol, op) in [('/', Op::Div), ('*', Op::Mul)] {
            if let Some((left, right)) = raw.split_once(symbol) {
                return Ok(Expr::Binary {
                    op,
                    left: Box::new(Self::parse_inner(left.trim())?),
                    right: Box::new(Self::parse_inner(right.trim())?),
                });
            }
        }

        let (pair, side) = if let Some(pair) = raw.strip_suffix("_bid") {
            (pair, Side::Bid)
        } else if let Some(pair) = raw.strip_suffix("_ask") {
            (pair, Side::Ask)
        } else {
            return Err(format!("terminal {raw:?} does not end in _bid or _ask"));
        };

        Ok(Expr::Lookup {
            pair: PairTemplate::parse(pair)?,
            side,
        })
    }

    /// Evaluate against a resolver that returns one side of a bare pair, or
    /// `None` when the pair cannot be resolved from the table. An unresolved
    /// terminal propagates through arithmetic nodes as `None` (the legacy
    /// wire contract's sentinel `-1`).
    pub fn evaluate<F>(&self, base: &str, quote: &str, anchor: Option<&str>, resolve: &F) -> Option<f64>
    where
        F: Fn(&str, Side) -> Option<f64>,
    {
        match self {
            Expr::Lookup { pair, side } => {
                let key = pair.render(base, quote, anchor)?;
                resolve(&key, *side)
            }
            Expr::Binary { op, left, right } => {
                let lhs = left.evaluate(base, quote, anchor, resolve)?;
                let rhs = right.evaluate(base, quote, anchor, resolve)?;
                Some(match op {
                    Op::Div => lhs / rhs,
                    Op::Mul => lhs * rhs,
                })
            }
        }
    }
}

/// Bid and ask expressions for one category.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    pub bid: Expr,
    pub ask: Expr,
}

/// The full derivation formula table. Immutable after load; passed by value
/// into the engine rather than held in any global.
#[derive(Debug, Clone, Default)]
pub struct FormulaSet {
    formulas: HashMap<Category, Formula>,
}

#[derive(Debug, Deserialize)]
struct RawFormulaDoc(HashMap<String, HashMap<String, String>>);

impl FormulaSet {
    /// Load and parse a formula document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FormulaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| FormulaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse a formula document from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, FormulaError> {
        let raw: RawFormulaDoc = serde_json::from_str(text)?;
        let mut formulas = HashMap::new();

        for (key, sides) in raw.0 {
            let category = Category::from_key(&key)
                .ok_or_else(|| FormulaError::UnknownCategory(key.clone()))?;
            let bid = sides
                .get("bid")
                .ok_or(FormulaError::MissingSide {
                    category,
                    side: Side::Bid,
                })
                .and_then(|expr| Expr::parse(expr))?;
            let ask = sides
                .get("ask")
                .ok_or(FormulaError::MissingSide {
                    category,
                    side: Side::Ask,
                })
                .and_then(|expr| Expr::parse(expr))?;
            formulas.insert(category, Formula { bid, ask });
        }

        Ok(Self { formulas })
    }

    pub fn get(&self, category: Category) -> Option<&Formula> {
        self.formulas.get(&category)
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }
}
