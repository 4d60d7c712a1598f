//! Query predicates.
//!
//! A predicate is an immutable conjunction of clauses. On the wire each
//! clause becomes one filter query; textually clauses are joined by `&`:
//!
//! ```text
//! project:CMIP6&replica:false&_timestamp:[2019-05-01T00:00:00.000000Z TO 2019-06-01T00:00:00.000000Z}
//! ```
//!
//! Reserved characters are never escaped; callers own well-formedness.

use crate::error::{StoreError, StoreResult};
use crate::record::{scalar_text, Record};
use crate::time::{format_timestamp, parse_timestamp, Timestamp};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Match-everything query.
pub const MATCH_ALL: &str = "*:*";

/// One clause of a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Clause {
    /// `field:value`; the value may contain `*` wildcards.
    Term {
        /// Field name.
        field: String,
        /// Value or wildcard pattern.
        value: String,
    },
    /// `field:[lo TO hi]`, with `{`/`}` marking exclusive bounds and `*` an open bound.
    Range {
        /// Field name.
        field: String,
        /// Lower bound, `None` when open.
        lo: Option<String>,
        /// Upper bound, `None` when open.
        hi: Option<String>,
        /// Whether `lo` itself matches.
        lo_inclusive: bool,
        /// Whether `hi` itself matches.
        hi_inclusive: bool,
    },
}

impl Clause {
    /// Creates a term clause.
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Clause::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates an inclusive timestamp window `[start TO stop]`.
    pub fn window(field: impl Into<String>, start: &Timestamp, stop: &Timestamp) -> Self {
        Clause::Range {
            field: field.into(),
            lo: Some(format_timestamp(start)),
            hi: Some(format_timestamp(stop)),
            lo_inclusive: true,
            hi_inclusive: true,
        }
    }

    /// Creates a half-open timestamp interval `[start TO stop}`.
    pub fn interval(field: impl Into<String>, start: &Timestamp, stop: &Timestamp) -> Self {
        Clause::Range {
            field: field.into(),
            lo: Some(format_timestamp(start)),
            hi: Some(format_timestamp(stop)),
            lo_inclusive: true,
            hi_inclusive: false,
        }
    }

    /// Field the clause constrains.
    pub fn field(&self) -> &str {
        match self {
            Clause::Term { field, .. } | Clause::Range { field, .. } => field,
        }
    }

    /// Parses a single `field:value` or `field:[lo TO hi]` clause.
    pub fn parse(text: &str) -> StoreResult<Self> {
        let text = text.trim();
        let (field, value) = text
            .split_once(':')
            .ok_or_else(|| StoreError::InvalidPredicate(format!("missing ':' in '{text}'")))?;
        let field = field.trim();
        let value = value.trim();
        if field.is_empty() || value.is_empty() {
            return Err(StoreError::InvalidPredicate(format!(
                "empty field or value in '{text}'"
            )));
        }

        let opens_range = value.starts_with('[') || value.starts_with('{');
        if !opens_range {
            return Ok(Clause::term(field, value));
        }

        let closes_range = value.ends_with(']') || value.ends_with('}');
        if !closes_range || value.len() < 2 {
            return Err(StoreError::InvalidPredicate(format!(
                "unterminated range in '{text}'"
            )));
        }
        let inner = &value[1..value.len() - 1];
        let (lo, hi) = inner
            .split_once(" TO ")
            .ok_or_else(|| StoreError::InvalidPredicate(format!("missing ' TO ' in '{text}'")))?;
        let bound = |b: &str| {
            let b = b.trim();
            (b != "*").then(|| b.to_string())
        };
        Ok(Clause::Range {
            field: field.to_string(),
            lo: bound(lo),
            hi: bound(hi),
            lo_inclusive: value.starts_with('['),
            hi_inclusive: value.ends_with(']'),
        })
    }

    /// Evaluates the clause against a record.
    pub fn matches(&self, record: &Record) -> bool {
        let values = record.values(self.field());
        let mut texts = values.iter().filter_map(scalar_text);
        match self {
            Clause::Term { value, .. } => {
                let pattern = value.trim_matches('"');
                texts.any(|text| wildcard_match(pattern, &text))
            }
            Clause::Range {
                lo,
                hi,
                lo_inclusive,
                hi_inclusive,
                ..
            } => texts.any(|text| {
                let above = match lo {
                    None => true,
                    Some(lo) => match compare_values(&text, lo) {
                        Ordering::Greater => true,
                        Ordering::Equal => *lo_inclusive,
                        Ordering::Less => false,
                    },
                };
                let below = match hi {
                    None => true,
                    Some(hi) => match compare_values(&text, hi) {
                        Ordering::Less => true,
                        Ordering::Equal => *hi_inclusive,
                        Ordering::Greater => false,
                    },
                };
                above && below
            }),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Term { field, value } => write!(f, "{field}:{value}"),
            Clause::Range {
                field,
                lo,
                hi,
                lo_inclusive,
                hi_inclusive,
            } => write!(
                f,
                "{field}:{}{} TO {}{}",
                if *lo_inclusive { '[' } else { '{' },
                lo.as_deref().unwrap_or("*"),
                hi.as_deref().unwrap_or("*"),
                if *hi_inclusive { ']' } else { '}' },
            ),
        }
    }
}

/// An immutable conjunction of clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// The predicate that matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Builds a predicate from clauses.
    pub fn from_clauses(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    /// Parses `field:value` clauses joined by `&`. `*:*` contributes nothing.
    pub fn parse(text: &str) -> StoreResult<Self> {
        let mut clauses = Vec::new();
        for part in text.split('&') {
            let part = part.trim();
            if part.is_empty() || part == MATCH_ALL {
                continue;
            }
            clauses.push(Clause::parse(part)?);
        }
        Ok(Self { clauses })
    }

    /// Shorthand for a single-term predicate such as `id:<id>`.
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            clauses: vec![Clause::term(field, value)],
        }
    }

    /// Returns a new predicate with one more clause.
    pub fn and(&self, clause: Clause) -> Self {
        let mut clauses = self.clauses.clone();
        clauses.push(clause);
        Self { clauses }
    }

    /// Returns the conjunction of both predicates.
    pub fn and_all(&self, other: &Predicate) -> Self {
        let mut clauses = self.clauses.clone();
        clauses.extend(other.clauses.iter().cloned());
        Self { clauses }
    }

    /// The clauses, in insertion order.
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// True when the predicate has no clauses.
    pub fn is_all(&self) -> bool {
        self.clauses.is_empty()
    }

    /// One rendered filter query per clause.
    pub fn filter_queries(&self) -> Vec<String> {
        self.clauses.iter().map(ToString::to_string).collect()
    }

    /// Renders the predicate as a single boolean query (`a AND b`).
    pub fn to_query(&self) -> String {
        if self.clauses.is_empty() {
            return MATCH_ALL.to_string();
        }
        self.clauses
            .iter()
            .map(|c| format!("({c})"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Evaluates every clause against a record.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|c| c.matches(record))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str(MATCH_ALL);
        }
        let rendered: Vec<String> = self.filter_queries();
        f.write_str(&rendered.join("&"))
    }
}

impl FromStr for Predicate {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Predicate::parse(s)
    }
}

/// Orders two values as timestamps, then numbers, then text.
fn compare_values(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (parse_timestamp(a), parse_timestamp(b)) {
        return x.cmp(&y);
    }
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    a.cmp(b)
}

/// `*` matches any run of characters, `?` exactly one.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn parses_terms_and_ranges() {
        let p = Predicate::parse(
            "project:CMIP6&replica:false&_timestamp:[2019-01-01T00:00:00Z TO *}",
        )
        .unwrap();
        assert_eq!(p.clauses().len(), 3);
        assert_eq!(p.clauses()[0], Clause::term("project", "CMIP6"));
        match &p.clauses()[2] {
            Clause::Range {
                field,
                lo,
                hi,
                lo_inclusive,
                hi_inclusive,
            } => {
                assert_eq!(field, "_timestamp");
                assert_eq!(lo.as_deref(), Some("2019-01-01T00:00:00Z"));
                assert!(hi.is_none());
                assert!(*lo_inclusive);
                assert!(!*hi_inclusive);
            }
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn match_all_is_empty() {
        assert!(Predicate::parse("*:*").unwrap().is_all());
        assert!(Predicate::parse("").unwrap().is_all());
        assert_eq!(Predicate::all().to_string(), "*:*");
        assert_eq!(Predicate::all().to_query(), "*:*");
    }

    #[test]
    fn rejects_malformed_clauses() {
        assert!(Predicate::parse("project").is_err());
        assert!(Predicate::parse("project:").is_err());
        assert!(Predicate::parse("_timestamp:[a TO b").is_err());
        assert!(Predicate::parse("_timestamp:[a b]").is_err());
    }

    #[test]
    fn and_is_non_destructive() {
        let base = Predicate::term("project", "CMIP6");
        let narrowed = base.and(Clause::term("latest", "true"));
        assert_eq!(base.clauses().len(), 1);
        assert_eq!(narrowed.clauses().len(), 2);
        assert_eq!(narrowed.to_string(), "project:CMIP6&latest:true");
        assert_eq!(narrowed.to_query(), "(project:CMIP6) AND (latest:true)");
    }

    #[test]
    fn interval_renders_half_open() {
        let start = Utc.with_ymd_and_hms(2019, 5, 1, 0, 0, 0).unwrap();
        let stop = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        let clause = Clause::interval("_timestamp", &start, &stop);
        assert_eq!(
            clause.to_string(),
            "_timestamp:[2019-05-01T00:00:00.000000Z TO 2019-06-01T00:00:00.000000Z}"
        );
        assert_eq!(Clause::parse(&clause.to_string()).unwrap(), clause);
    }

    #[test]
    fn matches_records() {
        let record = Record::new()
            .with("project", "CMIP6")
            .with("variable", json!(["hus", "tas"]))
            .with("latest", true)
            .with("version", 20190101)
            .with("_timestamp", "2019-05-01T00:00:00Z");

        assert!(Predicate::parse("project:CMIP6&latest:true").unwrap().matches(&record));
        assert!(Predicate::parse("variable:hu*").unwrap().matches(&record));
        assert!(Predicate::parse("variable:*").unwrap().matches(&record));
        assert!(!Predicate::parse("variable:pr").unwrap().matches(&record));
        assert!(!Predicate::parse("grid:*").unwrap().matches(&record));
        assert!(Predicate::parse("version:[20180101 TO 20200101]")
            .unwrap()
            .matches(&record));

        let at_stop = Predicate::parse(
            "_timestamp:[2019-04-01T00:00:00Z TO 2019-05-01T00:00:00Z}",
        )
        .unwrap();
        assert!(!at_stop.matches(&record));
        let at_start = Predicate::parse(
            "_timestamp:[2019-05-01T00:00:00Z TO 2019-06-01T00:00:00Z}",
        )
        .unwrap();
        assert!(at_start.matches(&record));
    }

    #[test]
    fn wildcards() {
        assert!(wildcard_match("regular*1/2*lat-lon*grid", "regular 1/2 degree lat-lon grid"));
        assert!(wildcard_match("a?c", "abc"));
        assert!(!wildcard_match("a?c", "ac"));
        assert!(wildcard_match("*", ""));
    }

    proptest! {
        #[test]
        fn parse_display_is_stable(
            clauses in prop::collection::vec(("[a-z_]{1,12}", "[A-Za-z0-9.|-]{1,16}"), 1..5)
        ) {
            let text = clauses
                .iter()
                .map(|(f, v)| format!("{f}:{v}"))
                .collect::<Vec<_>>()
                .join("&");
            let parsed = Predicate::parse(&text).unwrap();
            prop_assert_eq!(parsed.clauses().len(), clauses.len());
            prop_assert_eq!(parsed.to_string(), text);
        }
    }
}
