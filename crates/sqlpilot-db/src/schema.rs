use std::path::{Path, PathBuf};

use sqlpilot_types::{ColumnInfo, Schema, TableSchema};

use crate::error::DbError;
use crate::sqlite::{SqliteHandle, run_blocking};

const DEFAULT_COLUMN_TYPE: &str = "UNKNOWN";

/// Reads user tables and their columns from the database at `path`.
///
/// Internal `sqlite_*` tables are skipped. Tables come back in catalog order
/// and columns in declaration order. A database with no user tables yields an
/// empty [`Schema`].
pub async fn read_schema(path: PathBuf) -> Result<Schema, DbError> {
    run_blocking(move || read_schema_blocking(&path)).await
}

pub fn read_schema_blocking(path: &Path) -> Result<Schema, DbError> {
    let conn = SqliteHandle::open(path)?;

    let table_names = {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            )
            .map_err(|error| DbError::Execution(format!("prepare table listing: {error}")))?;
        stmt.query_map([], |row| row.get::<_, String>(0))
            .map_err(|error| DbError::Execution(format!("list tables: {error}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| DbError::Execution(format!("read table name: {error}")))?
    };

    let mut column_stmt = conn
        .prepare(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
        )
        .map_err(|error| DbError::Execution(format!("prepare table_info: {error}")))?;

    let mut tables = Vec::with_capacity(table_names.len());
    for name in table_names {
        let columns = column_stmt
            .query_map([name.as_str()], |row| {
                let decl_type: Option<String> = row.get(1)?;
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    decl_type: decl_type
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| DEFAULT_COLUMN_TYPE.to_string()),
                    not_null: row.get::<_, i64>(2)? != 0,
                    primary_key: row.get::<_, i64>(3)? != 0,
                })
            })
            .map_err(|error| DbError::Execution(format!("table_info {name}: {error}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| DbError::Execution(format!("read table_info {name}: {error}")))?;
        tables.push(TableSchema { name, columns });
    }

    Ok(Schema { tables })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn fixture(sql: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fixture.db");
        let conn = Connection::open(&path).expect("create fixture");
        conn.execute_batch(sql).expect("seed fixture");
        (dir, path)
    }

    #[test]
    fn lists_tables_and_columns_in_order() {
        let (_dir, path) = fixture(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE orders (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, amount REAL, note);",
        );
        let schema = read_schema_blocking(&path).expect("read schema");
        // AUTOINCREMENT creates sqlite_sequence, which must be filtered out.
        assert_eq!(schema.table_names().collect::<Vec<_>>(), ["users", "orders"]);

        let users = schema.table("users").expect("users table");
        assert_eq!(users.columns[0].name, "id");
        assert!(users.columns[0].primary_key);
        assert_eq!(users.columns[1].decl_type, "TEXT");
        assert!(users.columns[1].not_null);

        let orders = schema.table("orders").expect("orders table");
        let names: Vec<_> = orders.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "user_id", "amount", "note"]);
        assert_eq!(orders.columns[3].decl_type, DEFAULT_COLUMN_TYPE);
    }

    #[test]
    fn no_user_tables_is_an_empty_schema() {
        let (_dir, path) = fixture("CREATE VIEW v AS SELECT 1;");
        let schema = read_schema_blocking(&path).expect("read schema");
        assert!(schema.is_empty());
    }

    #[test]
    fn quoted_table_names_are_supported() {
        let (_dir, path) = fixture("CREATE TABLE \"odd name\" (\"a b\" TEXT);");
        let schema = read_schema_blocking(&path).expect("read schema");
        let table = schema.table("odd name").expect("odd table");
        assert_eq!(table.columns[0].name, "a b");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn async_wrapper_reads_schema() {
        let (_dir, path) = fixture("CREATE TABLE t (x);");
        let schema = read_schema(path).await.expect("read schema");
        assert_eq!(schema.table_names().collect::<Vec<_>>(), ["t"]);
    }
}
