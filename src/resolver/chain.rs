//! The priority-ordered match chain shared by every resolver.

use crate::resolver::{MatchStage, Resolution, ResolutionResult};
use crate::warehouse::{quote_ident, QueryExecutor, Row, WarehouseError};
use serde_json::Value;
use tracing::debug;

/// Characters stripped before alias comparison: ASCII space,
/// full-width (ideographic) space, and tab.
const STRIPPED: [char; 3] = [' ', '\u{3000}', '\t'];

/// Remove every whitespace class the chain ignores.
pub fn normalize(s: &str) -> String {
    s.chars().filter(|c| !STRIPPED.contains(c)).collect()
}

/// Comparison key for a keyword. SQLite's `lower()` folds ASCII only, so the
/// needle is folded the same way.
fn fold(s: &str) -> String {
    normalize(s).to_ascii_lowercase()
}

/// SQL expression applying [`fold`] to a column.
fn normalized_column(column: &str) -> String {
    format!(
        "lower(replace(replace(replace({}, ' ', ''), '\u{3000}', ''), char(9), ''))",
        quote_ident(column)
    )
}

/// A table plus the fields the chain looks at.
#[derive(Debug, Clone)]
pub struct MatchChain {
    table: String,
    id_field: String,
    code_field: String,
    alias_fields: Vec<String>,
}

/// One alias hit before the winner is picked.
struct Candidate {
    id: String,
    value: String,
    field_idx: usize,
}

impl Candidate {
    fn rank(&self) -> (usize, &str, usize) {
        (self.value.chars().count(), &self.value, self.field_idx)
    }
}

impl MatchChain {
    pub fn new(
        table: impl Into<String>,
        id_field: impl Into<String>,
        code_field: impl Into<String>,
        alias_fields: Vec<String>,
    ) -> Self {
        Self {
            table: table.into(),
            id_field: id_field.into(),
            code_field: code_field.into(),
            alias_fields,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn alias_fields(&self) -> &[String] {
        &self.alias_fields
    }

    /// Walk the chain for `keyword`.
    pub fn resolve(
        &self,
        db: &dyn QueryExecutor,
        keyword: &str,
    ) -> Result<ResolutionResult, WarehouseError> {
        let keyword = keyword.trim();
        let needle = fold(keyword);
        if needle.is_empty() {
            return Ok(ResolutionResult::NoMatch);
        }

        if let Some(id) = self.match_code(db, keyword)? {
            debug!("Resolved '{}' by {} -> {}", keyword, self.code_field, id);
            return Ok(ResolutionResult::Matched(Resolution {
                id,
                matched_field: self.code_field.clone(),
                matched_value: keyword.to_string(),
                stage: MatchStage::ShortCode,
            }));
        }

        for (stage, predicate) in [
            (MatchStage::ExactAlias, "{col} = ?1"),
            (MatchStage::ContainsAlias, "instr({col}, ?1) > 0"),
        ] {
            if let Some(best) = self.best_alias(db, predicate, &needle)? {
                debug!(
                    "Resolved '{}' by {:?} on {} -> {}",
                    keyword, stage, self.alias_fields[best.field_idx], best.id
                );
                return Ok(ResolutionResult::Matched(Resolution {
                    id: best.id,
                    matched_field: self.alias_fields[best.field_idx].clone(),
                    matched_value: best.value,
                    stage,
                }));
            }
        }

        debug!("No match for '{}' in {}", keyword, self.table);
        Ok(ResolutionResult::NoMatch)
    }

    /// Shortest non-empty alias of `id` across all alias fields.
    pub fn shortest_alias(
        &self,
        db: &dyn QueryExecutor,
        id: &str,
    ) -> Result<Option<String>, WarehouseError> {
        let mut best: Option<Candidate> = None;
        for (field_idx, field) in self.alias_fields.iter().enumerate() {
            let col = quote_ident(field);
            let sql = format!(
                "SELECT CAST({id} AS TEXT) AS id, {col} AS value FROM {table}
                 WHERE CAST({id} AS TEXT) = ?1 AND {col} IS NOT NULL AND {col} <> ''
                 ORDER BY length({col}), {col}
                 LIMIT 1",
                id = quote_ident(&self.id_field),
                table = quote_ident(&self.table),
            );
            let rows = db.query(&sql, &[id.trim()])?;
            best = pick(best, rows.into_iter().next(), field_idx);
        }
        Ok(best.map(|c| c.value))
    }

    fn match_code(&self, db: &dyn QueryExecutor, keyword: &str) -> Result<Option<String>, WarehouseError> {
        let sql = format!(
            "SELECT CAST({id} AS TEXT) AS id FROM {table}
             WHERE lower(CAST({code} AS TEXT)) = ?1
             ORDER BY {id}
             LIMIT 1",
            id = quote_ident(&self.id_field),
            table = quote_ident(&self.table),
            code = quote_ident(&self.code_field),
        );
        let rows = db.query(&sql, &[&keyword.to_ascii_lowercase()])?;
        Ok(rows.into_iter().next().and_then(|r| text(&r, "id")))
    }

    /// Best alias across all alias fields satisfying `predicate`, where
    /// `{col}` stands for the normalized column.
    fn best_alias(
        &self,
        db: &dyn QueryExecutor,
        predicate: &str,
        needle: &str,
    ) -> Result<Option<Candidate>, WarehouseError> {
        let mut best: Option<Candidate> = None;
        for (field_idx, field) in self.alias_fields.iter().enumerate() {
            let col = quote_ident(field);
            let sql = format!(
                "SELECT CAST({id} AS TEXT) AS id, {col} AS value FROM {table}
                 WHERE {cond}
                 ORDER BY length({col}), {col}
                 LIMIT 1",
                id = quote_ident(&self.id_field),
                table = quote_ident(&self.table),
                cond = predicate.replace("{col}", &normalized_column(field)),
            );
            let rows = db.query(&sql, &[needle])?;
            best = pick(best, rows.into_iter().next(), field_idx);
        }
        Ok(best)
    }
}

fn pick(best: Option<Candidate>, row: Option<Row>, field_idx: usize) -> Option<Candidate> {
    let candidate = row.and_then(|r| {
        Some(Candidate {
            id: text(&r, "id")?,
            value: text(&r, "value")?,
            field_idx,
        })
    });
    match (best, candidate) {
        (Some(b), Some(c)) => {
            let shorter = c.rank() < b.rank();
            Some(if shorter { c } else { b })
        }
        (b, c) => b.or(c),
    }
}

fn text(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
