//! Per-dialect rules the query guard is parameterised over.

use regex::Regex;
use std::sync::LazyLock;

static LIMIT_OR_FETCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\blimit\b|\bfetch\s+(next|first)\b").unwrap());

static TOP_OR_FETCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btop\b|\bfetch\s+(next|first)\b").unwrap());

/// How a dialect bounds a statement that has no row-limiting clause yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounding {
    /// Append `LIMIT <n>` at the end of the statement.
    TrailingLimit,
    /// Inject `TOP (<n>)` after the main `SELECT`, or append
    /// `OFFSET 0 ROWS FETCH NEXT <n> ROWS ONLY` when the statement is ordered.
    TopOrFetch,
}

/// Lexical rules for one SQL backend.
#[derive(Debug)]
pub struct Dialect {
    pub name: &'static str,
    /// Leading keywords a statement may start with.
    pub allowed_verbs: &'static [&'static str],
    /// Verbs that are accepted but never rewritten (their output is a plan,
    /// not rows).
    pub passthrough_verbs: &'static [&'static str],
    limit_clause: &'static LazyLock<Regex>,
    pub bounding: Bounding,
}

impl Dialect {
    /// Whether the text already carries a row-limiting clause.
    pub fn has_limit_clause(&self, sql: &str) -> bool {
        self.limit_clause.is_match(sql)
    }

    pub fn allows(&self, verb: &str) -> bool {
        self.allowed_verbs.contains(&verb)
    }

    /// Allowed verbs formatted for error messages, e.g. `SELECT / WITH`.
    pub fn allowed_list(&self) -> String {
        self.allowed_verbs
            .iter()
            .map(|v| v.to_uppercase())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// PostgreSQL / SQLite style backends.
pub static GENERIC: Dialect = Dialect {
    name: "generic",
    allowed_verbs: &["select", "with", "explain"],
    passthrough_verbs: &["explain"],
    limit_clause: &LIMIT_OR_FETCH_RE,
    bounding: Bounding::TrailingLimit,
};

/// SQL Server: no `LIMIT`, only `TOP` and `OFFSET .. FETCH`.
pub static RESTRICTIVE: Dialect = Dialect {
    name: "restrictive",
    allowed_verbs: &["select", "with"],
    passthrough_verbs: &[],
    limit_clause: &TOP_OR_FETCH_RE,
    bounding: Bounding::TopOrFetch,
};
