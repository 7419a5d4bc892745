//! SQLite values to JSON rows and CSV fields.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value as JsonValue;
use sqlpilot_types::Row;

use crate::error::DbError;

pub fn sqlite_value_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(v) => JsonValue::Number(v.into()),
        ValueRef::Real(v) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::String(BASE64.encode(bytes)),
    }
}

/// Result column names, with repeats renamed `name:1`, `name:2`, ... the way
/// SQLite names the columns of a subquery.
pub fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    unique_column_names(stmt.column_names())
}

fn unique_column_names<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut taken = HashSet::new();
    let mut names = Vec::new();
    for name in raw {
        let mut candidate = name.to_string();
        let mut counter = 0u32;
        while taken.contains(&candidate) {
            counter += 1;
            candidate = format!("{}:{counter}", strip_counter_suffix(name));
        }
        taken.insert(candidate.clone());
        names.push(candidate);
    }
    names
}

/// `id:3` becomes `id`; names without a numeric `:N` tail are unchanged.
fn strip_counter_suffix(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((base, digits))
            if !base.is_empty()
                && !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => name,
    }
}

/// Builds a row object keyed by `columns`, which must be unique (see
/// [`column_names`]).
pub fn row_object(columns: &[String], row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut object = Row::with_capacity(columns.len());
    for (index, name) in columns.iter().enumerate() {
        object.insert(name.clone(), sqlite_value_to_json(row.get_ref(index)?));
    }
    Ok(object)
}

/// Converts a JSON bind value to a SQLite value. Objects and arrays are rejected.
pub fn json_param_to_sqlite(index: usize, value: &JsonValue) -> Result<SqlValue, DbError> {
    match value {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        JsonValue::Number(n) => {
            if let Some(int) = n.as_i64() {
                Ok(SqlValue::Integer(int))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(DbError::Execution(format!(
                    "param {}: unsupported number",
                    index + 1
                )))
            }
        }
        JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Err(DbError::Execution(format!(
            "param {}: unsupported type (object/array)",
            index + 1
        ))),
    }
}

/// Appends one CSV field.
///
/// Fields containing a comma, a double quote, a carriage return or a newline
/// are quoted with inner quotes doubled. Null becomes an empty field.
pub fn push_csv_field(out: &mut String, value: &JsonValue) {
    match value {
        JsonValue::Null => {}
        JsonValue::String(text) => push_csv_text(out, text),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Number(n) => out.push_str(&n.to_string()),
        nested @ (JsonValue::Array(_) | JsonValue::Object(_)) => {
            push_csv_text(out, &nested.to_string())
        }
    }
}

pub fn push_csv_text(out: &mut String, text: &str) {
    if text.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&text.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(text);
    }
}

/// Terminates the record begun at `record_start`. An empty record is written
/// as `""` so readers that skip blank lines still see one empty field.
pub fn end_csv_record(out: &mut String, record_start: usize) {
    if out.len() == record_start {
        out.push_str("\"\"");
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn csv(value: JsonValue) -> String {
        let mut out = String::new();
        push_csv_field(&mut out, &value);
        out
    }

    #[test]
    fn csv_quotes_only_when_needed() {
        assert_eq!(csv(json!("plain")), "plain");
        assert_eq!(csv(json!("a,b")), "\"a,b\"");
        assert_eq!(csv(json!("say \"hi\"")), "\"say \"\"hi\"\"\"");
        assert_eq!(csv(json!("line\nbreak")), "\"line\nbreak\"");
    }

    #[test]
    fn empty_record_is_a_quoted_empty_field() {
        let mut out = String::from("a,b\n");
        let start = out.len();
        end_csv_record(&mut out, start);
        let start = out.len();
        out.push(',');
        end_csv_record(&mut out, start);
        assert_eq!(out, "a,b\n\"\"\n,\n");
    }

    #[test]
    fn csv_null_is_empty_not_literal() {
        assert_eq!(csv(JsonValue::Null), "");
        assert_eq!(csv(json!(42)), "42");
        assert_eq!(csv(json!(1.5)), "1.5");
    }

    #[test]
    fn repeated_column_names_get_counters() {
        assert_eq!(
            unique_column_names(["id", "name", "id", "user_id", "id"]),
            ["id", "name", "id:1", "user_id", "id:2"]
        );
        assert_eq!(unique_column_names(["x:1", "x", "x:1"]), ["x:1", "x", "x:2"]);
        assert_eq!(unique_column_names(["a:b", "a:b"]), ["a:b", "a:b:1"]);
    }

    #[test]
    fn values_map_to_json() {
        assert_eq!(sqlite_value_to_json(ValueRef::Null), JsonValue::Null);
        assert_eq!(sqlite_value_to_json(ValueRef::Integer(7)), json!(7));
        assert_eq!(sqlite_value_to_json(ValueRef::Real(f64::NAN)), JsonValue::Null);
        assert_eq!(sqlite_value_to_json(ValueRef::Text(b"hi")), json!("hi"));
        assert_eq!(sqlite_value_to_json(ValueRef::Blob(&[0, 1, 2])), json!("AAEC"));
    }

    #[test]
    fn params_convert_like_sqlite_affinities() {
        assert_eq!(json_param_to_sqlite(0, &json!(true)), Ok(SqlValue::Integer(1)));
        assert_eq!(json_param_to_sqlite(0, &json!(2.5)), Ok(SqlValue::Real(2.5)));
        assert_eq!(
            json_param_to_sqlite(0, &json!("x")),
            Ok(SqlValue::Text("x".into()))
        );
        assert!(matches!(
            json_param_to_sqlite(2, &json!([1])),
            Err(DbError::Execution(message)) if message.starts_with("param 3")
        ));
    }
}
