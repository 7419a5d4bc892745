use std::path::Path;
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use serde_json::Value as JsonValue;
use sqlpilot_types::StatementResult;
use tracing::debug;

use crate::encode::{column_names, json_param_to_sqlite, row_object};
use crate::error::DbError;
use crate::sqlite::{SqliteHandle, preview_sql, run_blocking};
use crate::state::ActiveDatabase;

/// Splits a script on `;` into trimmed, non-empty statements.
///
/// The split is textual: a `;` inside a string literal also splits.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .map(str::to_string)
        .collect()
}

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    let head = sql.trim_start();
    head.len() >= keyword.len()
        && head.is_char_boundary(keyword.len())
        && head[..keyword.len()].eq_ignore_ascii_case(keyword)
}

pub fn is_select(sql: &str) -> bool {
    starts_with_keyword(sql, "select")
}

fn is_insert(sql: &str) -> bool {
    starts_with_keyword(sql, "insert") || starts_with_keyword(sql, "replace")
}

/// Whether a statement may change the set of tables or columns.
pub fn changes_schema(sql: &str) -> bool {
    ["create", "alter", "drop"]
        .iter()
        .any(|keyword| starts_with_keyword(sql, keyword))
}

pub fn batch_changes_schema(results: &[StatementResult]) -> bool {
    results.iter().any(|result| changes_schema(result.sql()))
}

/// Runs statement batches against the active database and materializes
/// every result.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    active: Arc<ActiveDatabase>,
}

impl QueryExecutor {
    pub fn new(active: Arc<ActiveDatabase>) -> Self {
        Self { active }
    }

    /// Executes each `;`-separated statement in order on one connection.
    ///
    /// Each statement autocommits. The first failure aborts the batch and
    /// statements already run stay applied. Bind values are consumed in order
    /// across the batch, each statement taking as many as it declares.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[JsonValue],
    ) -> Result<Vec<StatementResult>, DbError> {
        let path = self.active.require_path()?;
        let statements = split_statements(sql);
        if statements.is_empty() {
            return Err(DbError::Execution("Empty SQL".to_string()));
        }
        let params = params
            .iter()
            .enumerate()
            .map(|(index, value)| json_param_to_sqlite(index, value))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            sql_preview = %preview_sql(sql),
            statements = statements.len(),
            params = params.len(),
            "executing batch"
        );
        run_blocking(move || execute_blocking(&path, statements, &params)).await
    }
}

fn execute_blocking(
    path: &Path,
    statements: Vec<String>,
    params: &[SqlValue],
) -> Result<Vec<StatementResult>, DbError> {
    let conn = SqliteHandle::open(path)?;
    let mut results = Vec::with_capacity(statements.len());
    let mut next_param = 0;

    for sql in statements {
        let mut stmt = conn.prepare(&sql)?;

        let take = stmt
            .parameter_count()
            .min(params.len().saturating_sub(next_param));
        for (offset, value) in params[next_param..next_param + take].iter().enumerate() {
            stmt.raw_bind_parameter(offset + 1, value)?;
        }
        next_param += take;

        if is_select(&sql) || stmt.column_count() > 0 {
            let columns = column_names(&stmt);
            let mut rows = Vec::new();
            let mut raw_rows = stmt.raw_query();
            while let Some(row) = raw_rows.next()? {
                rows.push(row_object(&columns, row)?);
            }
            results.push(StatementResult::Select { sql, rows });
        } else {
            let changed = stmt.raw_execute()?;
            let inserted_id = (changed > 0 && is_insert(&sql)).then(|| conn.last_insert_rowid());
            results.push(StatementResult::Modify {
                sql,
                rows_changed: changed as u64,
                inserted_id,
            });
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::LoadedDatabase;
    use serde_json::json;

    #[test]
    fn split_drops_empty_fragments() {
        assert_eq!(
            split_statements("  SELECT 1 ;; \n INSERT INTO t VALUES (2);\n"),
            ["SELECT 1", "INSERT INTO t VALUES (2)"]
        );
        assert!(split_statements(" ; ; ").is_empty());
    }

    #[test]
    fn classification_is_prefix_based() {
        assert!(is_select("  select * from t"));
        assert!(is_select("SELECT 1"));
        assert!(!is_select("UPDATE t SET x = 1"));
        assert!(!is_select("sel"));
        assert!(changes_schema("CREATE TABLE x (y)"));
        assert!(changes_schema("drop table x"));
        assert!(!changes_schema("INSERT INTO created VALUES (1)"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn no_database_fails_before_opening_anything() {
        let executor = QueryExecutor::new(ActiveDatabase::new());
        assert_eq!(
            executor.execute("SELECT 1", &[]).await,
            Err(DbError::NoDatabaseLoaded)
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn batch_results_follow_statement_order() {
        let db = LoadedDatabase::new("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);").await;
        let executor = QueryExecutor::new(Arc::clone(db.active()));
        let results = executor
            .execute(
                "INSERT INTO t (name) VALUES ('a'); SELECT id, name FROM t; UPDATE t SET name = 'b'",
                &[],
            )
            .await
            .expect("batch");

        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0],
            StatementResult::Modify {
                sql: "INSERT INTO t (name) VALUES ('a')".into(),
                rows_changed: 1,
                inserted_id: Some(1),
            }
        );
        let StatementResult::Select { rows, .. } = &results[1] else {
            panic!("second result must be a select: {:?}", results[1]);
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(json!(rows[0]), json!({"id": 1, "name": "a"}));
        assert!(matches!(
            results[2],
            StatementResult::Modify { rows_changed: 1, inserted_id: None, .. }
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failure_aborts_without_rolling_back() {
        let db = LoadedDatabase::new("CREATE TABLE t (id INTEGER PRIMARY KEY);").await;
        let executor = QueryExecutor::new(Arc::clone(db.active()));
        let error = executor
            .execute(
                "INSERT INTO t VALUES (1); INSERT INTO missing VALUES (2); INSERT INTO t VALUES (3)",
                &[],
            )
            .await
            .expect_err("second statement fails");
        let DbError::Execution(message) = error else {
            panic!("expected execution error, got {error:?}");
        };
        assert!(message.contains("no such table"), "{message}");

        let results = executor.execute("SELECT id FROM t", &[]).await.expect("select");
        let StatementResult::Select { rows, .. } = &results[0] else {
            panic!("expected rows");
        };
        assert_eq!(json!(rows), json!([{"id": 1}]));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn params_are_consumed_across_the_batch() {
        let db = LoadedDatabase::new("CREATE TABLE t (id INTEGER, label TEXT);").await;
        let executor = QueryExecutor::new(Arc::clone(db.active()));
        let results = executor
            .execute(
                "INSERT INTO t VALUES (?, ?); SELECT label FROM t WHERE id = ?",
                &[json!(7), json!("seven"), json!(7)],
            )
            .await
            .expect("batch");
        let StatementResult::Select { rows, .. } = &results[1] else {
            panic!("expected rows");
        };
        assert_eq!(json!(rows), json!([{"label": "seven"}]));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn row_returning_statements_are_captured_as_selects() {
        let db = LoadedDatabase::new("CREATE TABLE t (a TEXT NOT NULL, b);").await;
        let executor = QueryExecutor::new(Arc::clone(db.active()));
        let results = executor
            .execute("PRAGMA table_info(t); WITH x AS (SELECT 1 AS n) SELECT n FROM x", &[])
            .await
            .expect("batch");
        assert!(results.iter().all(StatementResult::is_select));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn joined_columns_with_one_name_are_all_kept() {
        let db = LoadedDatabase::new(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER);
             INSERT INTO users (name) VALUES ('Ada');
             INSERT INTO orders (id, user_id) VALUES (40, 1);",
        )
        .await;
        let executor = QueryExecutor::new(Arc::clone(db.active()));
        let mut results = executor
            .execute("SELECT * FROM users JOIN orders ON orders.user_id = users.id", &[])
            .await
            .expect("join");
        let StatementResult::Select { rows, .. } = results.remove(0) else {
            panic!("expected select");
        };
        assert_eq!(
            json!(rows),
            json!([{"id": 1, "name": "Ada", "id:1": 40, "user_id": 1}])
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn empty_script_is_rejected() {
        let db = LoadedDatabase::new("CREATE TABLE t (a);").await;
        let executor = QueryExecutor::new(Arc::clone(db.active()));
        assert_eq!(
            executor.execute(" ;\n ", &[]).await,
            Err(DbError::Execution("Empty SQL".into()))
        );
    }
}
