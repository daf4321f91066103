//! Query guard: keeps free-text SQL read-only and row-bounded.
//!
//! The classification is lexical (leading keyword plus keyword presence),
//! not a parse. Text that smuggles a second statement after a valid prefix,
//! or limiting keywords that only appear inside literals or comments, are
//! not detected.

pub mod dialect;

pub use dialect::{Bounding, Dialect, GENERIC, RESTRICTIVE};

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static ORDER_BY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\border\s+by\b").unwrap());

static SELECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bselect\b").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("Only {allowed} statements are allowed, got `{verb}`")]
    UnsafeStatement { verb: String, allowed: String },
}

/// Facts derived from a statement's text. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStatement<'a> {
    pub text: &'a str,
    /// Lower-cased leading keyword (empty when the text starts with a symbol).
    pub verb: String,
    pub is_read_only: bool,
    pub has_row_limit: bool,
    pub has_order_by: bool,
}

/// A guard bound to one dialect's rules.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuard {
    dialect: &'static Dialect,
}

impl QueryGuard {
    pub fn new(dialect: &'static Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &'static Dialect {
        self.dialect
    }

    /// Classify a statement without rewriting it.
    pub fn inspect<'a>(&self, sql: &'a str) -> SqlStatement<'a> {
        let verb = leading_verb(sql);
        SqlStatement {
            text: sql,
            is_read_only: self.dialect.allows(&verb),
            has_row_limit: self.dialect.has_limit_clause(sql),
            has_order_by: ORDER_BY_RE.is_match(sql),
            verb,
        }
    }

    /// Return a statement that is safe to execute, bounded to `limit` rows.
    ///
    /// Statements that already carry a limiting clause come back byte-for-byte.
    pub fn guard(&self, sql: &str, limit: i64) -> Result<String, GuardError> {
        let stmt = self.inspect(sql);

        if !stmt.is_read_only {
            return Err(GuardError::UnsafeStatement {
                verb: stmt.verb,
                allowed: self.dialect.allowed_list(),
            });
        }

        if stmt.has_row_limit || self.dialect.passthrough_verbs.contains(&stmt.verb.as_str()) {
            return Ok(sql.to_string());
        }

        let rewritten = match self.dialect.bounding {
            Bounding::TrailingLimit => format!("{} LIMIT {}", strip_terminator(sql), limit),
            Bounding::TopOrFetch if stmt.has_order_by => format!(
                "{} OFFSET 0 ROWS FETCH NEXT {} ROWS ONLY",
                strip_terminator(sql),
                limit
            ),
            Bounding::TopOrFetch => match main_select(sql) {
                Some((start, end)) => {
                    format!("{}SELECT TOP ({}){}", &sql[..start], limit, &sql[end..])
                }
                // A CTE feeding something other than SELECT: nothing to bound.
                None => sql.to_string(),
            },
        };

        Ok(rewritten)
    }
}

/// First word of the trimmed, lower-cased text.
fn leading_verb(sql: &str) -> String {
    sql.trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_lowercase()
}

/// Drop trailing semicolons and trailing `--` comments, so an appended
/// clause is not swallowed by a comment.
fn strip_terminator(sql: &str) -> &str {
    let mut text = sql.trim_end();
    loop {
        let stripped = strip_line_comment(text).trim_end().trim_end_matches(';').trim_end();
        if stripped.len() == text.len() {
            return text;
        }
        text = stripped;
    }
}

/// `text` without a `--` comment on its last line. Dashes inside a quoted
/// literal do not count.
fn strip_line_comment(text: &str) -> &str {
    let line_start = text.rfind('\n').map_or(0, |i| i + 1);
    let (_, mut quoted) = nesting_at(text, line_start);
    for (i, c) in text[line_start..].char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '-' if !quoted && text[line_start + i..].starts_with("--") => {
                return &text[..line_start + i];
            }
            _ => {}
        }
    }
    text
}

/// Byte span of the first `SELECT` keyword outside parentheses and quotes,
/// i.e. the main query of a plain select or of a `WITH` statement.
fn main_select(sql: &str) -> Option<(usize, usize)> {
    SELECT_RE
        .find_iter(sql)
        .find(|m| nesting_at(sql, m.start()) == (0, false))
        .map(|m| (m.start(), m.end()))
}

/// Parenthesis depth and whether `pos` sits inside a single-quoted literal.
fn nesting_at(sql: &str, pos: usize) -> (i32, bool) {
    let mut depth = 0;
    let mut quoted = false;
    for c in sql[..pos].chars() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth -= 1,
            _ => {}
        }
    }
    (depth, quoted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mssql() -> QueryGuard {
        QueryGuard::new(&RESTRICTIVE)
    }

    fn generic() -> QueryGuard {
        QueryGuard::new(&GENERIC)
    }

    #[test]
    fn injects_top_when_unbounded_and_unordered() {
        let out = mssql().guard("select * from prices", 500).unwrap();
        assert_eq!(out, "SELECT TOP (500) * from prices");
    }

    #[test]
    fn appends_fetch_when_ordered() {
        let out = mssql()
            .guard("select * from prices order by dt desc", 500)
            .unwrap();
        assert_eq!(
            out,
            "select * from prices order by dt desc OFFSET 0 ROWS FETCH NEXT 500 ROWS ONLY"
        );
    }

    #[test]
    fn rejects_writes_naming_the_verb() {
        let err = mssql().guard("delete from prices", 500).unwrap_err();
        assert_eq!(
            err,
            GuardError::UnsafeStatement {
                verb: "delete".into(),
                allowed: "SELECT / WITH".into(),
            }
        );
        assert!(err.to_string().contains("delete"));
    }

    #[test]
    fn explain_only_allowed_on_generic() {
        assert!(mssql().guard("explain select 1", 10).is_err());
        assert_eq!(
            generic().guard("EXPLAIN select * from t", 10).unwrap(),
            "EXPLAIN select * from t"
        );
    }

    #[test]
    fn trailing_line_comment_does_not_swallow_the_bound() {
        assert_eq!(
            mssql()
                .guard("select * from prices order by dt -- newest first", 50)
                .unwrap(),
            "select * from prices order by dt OFFSET 0 ROWS FETCH NEXT 50 ROWS ONLY"
        );
        assert_eq!(
            generic()
                .guard("select * from t;\n-- done\n-- really", 5)
                .unwrap(),
            "select * from t LIMIT 5"
        );
        assert_eq!(
            generic().guard("select '--x' from t", 5).unwrap(),
            "select '--x' from t LIMIT 5"
        );
    }

    #[test]
    fn existing_limit_passes_through_unchanged() {
        let sql = "  SELECT TOP 5 * FROM prices  ";
        assert_eq!(mssql().guard(sql, 500).unwrap(), sql);

        let sql = "select * from t order by a offset 10 rows fetch next 3 rows only";
        assert_eq!(mssql().guard(sql, 500).unwrap(), sql);

        let sql = "select * from t limit 3;";
        assert_eq!(generic().guard(sql, 500).unwrap(), sql);
    }

    #[test]
    fn guarding_twice_is_a_no_op() {
        for sql in ["select a from t", "select a from t order by a", "with x as (select 1) select * from x"] {
            let once = mssql().guard(sql, 50).unwrap();
            let twice = mssql().guard(&once, 50).unwrap();
            assert_eq!(once, twice);
        }
        let once = generic().guard("select a from t", 50).unwrap();
        assert_eq!(generic().guard(&once, 50).unwrap(), once);
    }

    #[test]
    fn cte_is_bounded_on_its_main_query() {
        let out = mssql()
            .guard("WITH x AS (SELECT id FROM t) select * from x", 20)
            .unwrap();
        assert_eq!(out, "WITH x AS (SELECT id FROM t) SELECT TOP (20) * from x");
    }

    #[test]
    fn generic_appends_limit_and_drops_terminator() {
        assert_eq!(
            generic().guard("select * from t order by a;  ", 100).unwrap(),
            "select * from t order by a LIMIT 100"
        );
    }

    #[test]
    fn keyword_detection_respects_word_boundaries() {
        let stmt = mssql().inspect("select stop, topic from t");
        assert!(!stmt.has_row_limit);
        assert!(!stmt.has_order_by);

        let stmt = mssql().inspect("select * from t ORDER\n  BY x");
        assert!(stmt.has_order_by);
    }

    #[test]
    fn empty_or_symbolic_text_is_unsafe() {
        assert!(mssql().guard("", 10).is_err());
        assert!(generic().guard("(select 1)", 10).is_err());
    }
}
