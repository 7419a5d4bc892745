//! Request and response shapes for the sqlpilot HTTP API.
//!
//! Rows are JSON objects whose keys keep the column order of the statement
//! that produced them (`serde_json` is built with `preserve_order`).

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// One result row: column name to value, in column order.
pub type Row = JsonMap<String, JsonValue>;

/// Body of the JSON sentinel returned when a database has no user tables.
pub const EMPTY_SCHEMA_MESSAGE: &str = "No user tables found in this database.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQueryResponse {
    pub result: Vec<StatementResult>,
}

/// Outcome of one statement in a batch, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatementResult {
    Select {
        sql: String,
        rows: Vec<Row>,
    },
    Modify {
        sql: String,
        rows_changed: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inserted_id: Option<i64>,
    },
}

impl StatementResult {
    pub fn sql(&self) -> &str {
        match self {
            Self::Select { sql, .. } | Self::Modify { sql, .. } => sql,
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(self, Self::Select { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub decl_type: String,
    #[serde(rename = "notnull")]
    pub not_null: bool,
    #[serde(rename = "pk")]
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// User tables of a database in discovery order.
///
/// On the wire this is an object keyed by table name. A database without user
/// tables serializes as `{"message": "..."}` instead, which is what the
/// front-end checks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub tables: Vec<TableSchema>,
}

impl Schema {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.name == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|table| table.name.as_str())
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.tables.is_empty() {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry("message", EMPTY_SCHEMA_MESSAGE)?;
            return map.end();
        }
        let mut map = serializer.serialize_map(Some(self.tables.len()))?;
        for table in &self.tables {
            map.serialize_entry(&table.name, &table.columns)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object = JsonMap::<String, JsonValue>::deserialize(deserializer)?;
        if object.len() == 1
            && let Some(JsonValue::String(_)) = object.get("message")
        {
            return Ok(Self::default());
        }
        let mut tables = Vec::with_capacity(object.len());
        for (name, columns) in object {
            let columns: Vec<ColumnInfo> = serde_json::from_value(columns)
                .map_err(|error| de::Error::custom(format!("table {name}: {error}")))?;
            tables.push(TableSchema { name, columns });
        }
        Ok(Self { tables })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json; charset=utf-8",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn attachment_name(self) -> String {
        format!("query_results.{}", self.as_str())
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unsupported export format '{other}' (expected csv or json)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportQuery {
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}
