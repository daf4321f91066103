//! Public contract of the query guard, exercised through the library API.

use warehouse_agent::guard::{GuardError, QueryGuard, GENERIC, RESTRICTIVE};

fn generic() -> QueryGuard {
    QueryGuard::new(&GENERIC)
}

fn restrictive() -> QueryGuard {
    QueryGuard::new(&RESTRICTIVE)
}

#[test]
fn writes_are_refused_in_both_dialects() {
    for sql in [
        "INSERT INTO t VALUES (1)",
        "update t set a = 1",
        "  DELETE FROM t",
        "DROP TABLE t",
        "(SELECT 1)",
    ] {
        assert!(
            matches!(generic().guard(sql, 10), Err(GuardError::UnsafeStatement { .. })),
            "generic accepted {sql}"
        );
        assert!(
            matches!(restrictive().guard(sql, 10), Err(GuardError::UnsafeStatement { .. })),
            "restrictive accepted {sql}"
        );
    }
}

#[test]
fn explain_is_generic_only() {
    let sql = "EXPLAIN SELECT * FROM t";
    assert_eq!(generic().guard(sql, 10).unwrap(), sql);
    assert!(restrictive().guard(sql, 10).is_err());
}

#[test]
fn bounded_statements_come_back_byte_for_byte() {
    let generic_cases = [
        "SELECT * FROM t LIMIT 5",
        "select a from t order by a fetch first 3 rows only",
    ];
    for sql in generic_cases {
        assert_eq!(generic().guard(sql, 100).unwrap(), sql);
    }

    let restrictive_cases = [
        "SELECT TOP 5 * FROM t",
        "SELECT a FROM t ORDER BY a OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY",
    ];
    for sql in restrictive_cases {
        assert_eq!(restrictive().guard(sql, 100).unwrap(), sql);
    }
}

#[test]
fn unbounded_statements_gain_exactly_one_bound() {
    assert_eq!(
        generic().guard("SELECT * FROM t;", 50).unwrap(),
        "SELECT * FROM t LIMIT 50"
    );
    assert_eq!(
        restrictive().guard("SELECT * FROM t", 50).unwrap(),
        "SELECT TOP (50) * FROM t"
    );
    assert_eq!(
        restrictive().guard("SELECT * FROM t ORDER BY a", 50).unwrap(),
        "SELECT * FROM t ORDER BY a OFFSET 0 ROWS FETCH NEXT 50 ROWS ONLY"
    );
}

#[test]
fn guarding_is_idempotent() {
    for (guard, sql) in [
        (generic(), "WITH x AS (SELECT 1 AS a) SELECT a FROM x"),
        (restrictive(), "WITH x AS (SELECT 1 AS a) SELECT a FROM x"),
        (restrictive(), "select * from t order by 1"),
    ] {
        let once = guard.guard(sql, 20).unwrap();
        let twice = guard.guard(&once, 20).unwrap();
        assert_eq!(once, twice);
    }
}

#[test]
fn error_names_the_offending_verb() {
    let err = restrictive().guard("MERGE INTO t USING s ON 1=1", 10).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Only SELECT / WITH statements are allowed, got `merge`"
    );
}
