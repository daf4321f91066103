//! Entity resolution: translate human-entered names into internal identifiers.
//!
//! Every lookup walks the same priority chain, stopping at the first stage
//! that produces a hit:
//! 1. exact match on the canonical short code (e.g. a ticker)
//! 2. exact match on any alias field, whitespace-normalized
//! 3. substring match on the alias fields, whitespace-normalized, preferring
//!    the shortest alias and then the lexicographically smallest
//!
//! A miss is data ([`ResolutionResult::NoMatch`]), never an error.

pub mod chain;

pub use chain::{normalize, MatchChain};

use crate::config::{CategoryConfig, EntityConfig};
use crate::warehouse::{quote_ident, QueryExecutor, Row, WarehouseError};
use serde::Serialize;
use serde_json::{json, Value};

/// Which stage of the chain produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    ShortCode,
    ExactAlias,
    ContainsAlias,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub id: String,
    pub matched_field: String,
    pub matched_value: String,
    pub stage: MatchStage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    Matched(Resolution),
    NoMatch,
}

impl ResolutionResult {
    /// Tool-result payload: the resolution object, or `{}` on a miss.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Matched(r) => serde_json::to_value(r).unwrap_or_else(|_| json!({})),
            Self::NoMatch => json!({}),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Matched(r) => Some(&r.id),
            Self::NoMatch => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Entities (companies / securities)
// ---------------------------------------------------------------------------

/// Resolver for the entity table, plus the reverse and membership lookups.
#[derive(Debug, Clone)]
pub struct EntityResolver {
    chain: MatchChain,
    category_field: String,
}

impl EntityResolver {
    pub fn new(chain: MatchChain, category_field: impl Into<String>) -> Self {
        Self {
            chain,
            category_field: category_field.into(),
        }
    }

    pub fn from_config(cfg: &EntityConfig) -> Self {
        Self::new(
            MatchChain::new(&cfg.table, &cfg.id_field, &cfg.code_field, cfg.alias_fields.clone()),
            &cfg.category_field,
        )
    }

    pub fn resolve(
        &self,
        db: &dyn QueryExecutor,
        keyword: &str,
    ) -> Result<ResolutionResult, WarehouseError> {
        self.chain.resolve(db, keyword)
    }

    /// The representative name of an identifier: its shortest alias,
    /// ties broken alphabetically.
    pub fn representative_name(
        &self,
        db: &dyn QueryExecutor,
        id: &str,
    ) -> Result<Option<String>, WarehouseError> {
        self.chain.shortest_alias(db, id)
    }

    /// Entities whose category field equals `category_id`, ordered by id.
    pub fn members_of(
        &self,
        db: &dyn QueryExecutor,
        category_id: &str,
        limit: i64,
    ) -> Result<Vec<Row>, WarehouseError> {
        let name_column = self
            .chain
            .alias_fields()
            .first()
            .map(|f| format!(", {} AS name", quote_ident(f)))
            .unwrap_or_default();
        let sql = format!(
            "SELECT CAST({id} AS TEXT) AS id{name_column} FROM {table}
             WHERE CAST({cat} AS TEXT) = ?1
             ORDER BY {id}
             LIMIT {limit}",
            id = quote_ident(self.chain.id_field()),
            table = quote_ident(self.chain.table()),
            cat = quote_ident(&self.category_field),
        );
        db.query(&sql, &[category_id.trim()])
    }
}

// ---------------------------------------------------------------------------
// Categories (industries)
// ---------------------------------------------------------------------------

/// Resolver for the category table: a code field and a single name field.
#[derive(Debug, Clone)]
pub struct CategoryResolver {
    chain: MatchChain,
}

impl CategoryResolver {
    pub fn from_config(cfg: &CategoryConfig) -> Self {
        Self {
            chain: MatchChain::new(&cfg.table, &cfg.id_field, &cfg.code_field, vec![cfg.name_field.clone()]),
        }
    }

    pub fn resolve(
        &self,
        db: &dyn QueryExecutor,
        keyword: &str,
    ) -> Result<ResolutionResult, WarehouseError> {
        self.chain.resolve(db, keyword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::SqliteWarehouse;

    fn warehouse() -> SqliteWarehouse {
        let db = SqliteWarehouse::open_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE companies (
                stock_id TEXT, ticker TEXT, short_name TEXT,
                full_name TEXT, english_name TEXT, industry_id TEXT);
             INSERT INTO companies VALUES
                ('2330', '2330', '台積電', '台灣積體電路製造', 'TSMC', '24'),
                ('2317', '2317', '鴻　海', '鴻海精密工業', 'Hon Hai', '31'),
                ('2303', '2303', '聯電', '聯華電子', 'UMC', '24'),
                ('9001', '9001', '2330概念', '概念股基金', NULL, '99');
             CREATE TABLE industries (industry_id TEXT, industry_name TEXT);
             INSERT INTO industries VALUES
                ('24', '半導體業'),
                ('31', '其他電子業');",
        )
        .unwrap();
        db
    }

    fn entities() -> EntityResolver {
        EntityResolver::from_config(&EntityConfig::default())
    }

    fn categories() -> CategoryResolver {
        CategoryResolver::from_config(&CategoryConfig::default())
    }

    #[test]
    fn short_code_beats_alias_substring() {
        let db = warehouse();
        let hit = entities().resolve(&db, "2330").unwrap();
        assert_eq!(
            hit,
            ResolutionResult::Matched(Resolution {
                id: "2330".into(),
                matched_field: "ticker".into(),
                matched_value: "2330".into(),
                stage: MatchStage::ShortCode,
            })
        );
    }

    #[test]
    fn whitespace_variants_resolve_to_the_same_id() {
        let db = warehouse();
        let r = entities();
        assert_eq!(r.resolve(&db, "台 積 電").unwrap().id(), Some("2330"));
        assert_eq!(r.resolve(&db, "台積電").unwrap().id(), Some("2330"));
        assert_eq!(r.resolve(&db, "\t台積電　").unwrap().id(), Some("2330"));

        let hit = r.resolve(&db, "鴻海").unwrap();
        match hit {
            ResolutionResult::Matched(m) => {
                assert_eq!(m.id, "2317");
                assert_eq!(m.stage, MatchStage::ExactAlias);
                assert_eq!(m.matched_field, "short_name");
            }
            ResolutionResult::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn latin_aliases_match_regardless_of_case() {
        let db = warehouse();
        let r = entities();
        for keyword in ["TSMC", "tsmc", "Tsmc"] {
            match r.resolve(&db, keyword).unwrap() {
                ResolutionResult::Matched(m) => {
                    assert_eq!(m.id, "2330");
                    assert_eq!(m.stage, MatchStage::ExactAlias);
                    assert_eq!(m.matched_value, "TSMC");
                }
                ResolutionResult::NoMatch => panic!("{keyword} did not resolve"),
            }
        }
        assert_eq!(r.resolve(&db, "hon hai").unwrap().id(), Some("2317"));
        assert_eq!(r.resolve(&db, "umc").unwrap().id(), Some("2303"));
    }

    #[test]
    fn substring_prefers_shortest_then_alphabetical() {
        let db = warehouse();
        // "電" appears in 台積電 (3), 聯電 (2), 聯華電子 (4), 台灣積體電路製造 (8)
        let hit = entities().resolve(&db, "電").unwrap();
        match hit {
            ResolutionResult::Matched(m) => {
                assert_eq!(m.id, "2303");
                assert_eq!(m.matched_value, "聯電");
                assert_eq!(m.stage, MatchStage::ContainsAlias);
            }
            ResolutionResult::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn unmatched_keyword_is_data_not_error() {
        let db = warehouse();
        let miss = entities().resolve(&db, "不存在公司").unwrap();
        assert_eq!(miss, ResolutionResult::NoMatch);
        assert_eq!(miss.to_payload(), json!({}));
        assert_eq!(entities().resolve(&db, "  ").unwrap(), ResolutionResult::NoMatch);
    }

    #[test]
    fn representative_name_is_shortest_alias() {
        let db = warehouse();
        let r = entities();
        assert_eq!(r.representative_name(&db, "2330").unwrap().as_deref(), Some("台積電"));
        assert_eq!(r.representative_name(&db, "2303").unwrap().as_deref(), Some("聯電"));
        assert_eq!(r.representative_name(&db, "0000").unwrap(), None);
    }

    #[test]
    fn category_chain_and_membership() {
        let db = warehouse();
        let c = categories();
        assert_eq!(c.resolve(&db, "24").unwrap().id(), Some("24"));
        assert_eq!(c.resolve(&db, "半導體").unwrap().id(), Some("24"));
        assert_eq!(c.resolve(&db, "電子").unwrap().id(), Some("31"));

        let members = entities().members_of(&db, "24", 500).unwrap();
        let ids: Vec<_> = members.iter().map(|m| m["id"].clone()).collect();
        assert_eq!(ids, vec![json!("2303"), json!("2330")]);
        assert_eq!(members[0]["name"], json!("聯電"));
        assert_eq!(entities().members_of(&db, "24", 1).unwrap().len(), 1);
    }
}
