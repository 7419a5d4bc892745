//! Paged export of a single query's result set.
//!
//! The query is wrapped as a subquery twice: once to count rows and once per
//! page with `LIMIT`/`OFFSET`. Rows are encoded page by page and written to the
//! sink as they are produced, so memory stays bounded by the page size.

use std::sync::Arc;

use rusqlite::Connection;
use sqlpilot_types::{ExportFormat, Row};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::encode::{column_names, end_csv_record, push_csv_field, push_csv_text, row_object};
use crate::error::DbError;
use crate::sqlite::{SqliteHandle, preview_sql, run_blocking};
use crate::state::ActiveDatabase;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub format: ExportFormat,
    pub page_size: usize,
}

impl StreamOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::new(ExportFormat::Json)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// `COUNT(*)` of the query when the stream started.
    pub total_rows: u64,
    pub rows_written: u64,
    pub pages: u64,
    pub bytes_written: u64,
}

/// Strips surrounding whitespace and trailing terminators from a single
/// statement.
pub fn normalize_single_statement(sql: &str) -> Result<String, DbError> {
    let mut text = sql.trim();
    while let Some(stripped) = text.strip_suffix(';') {
        text = stripped.trim_end();
    }
    if text.is_empty() {
        return Err(DbError::Execution("Empty SQL".to_string()));
    }
    Ok(text.to_string())
}

/// Encoder state for one export.
#[derive(Debug)]
struct StreamSession {
    format: ExportFormat,
    rows_emitted: u64,
    csv_header: Option<Vec<String>>,
}

impl StreamSession {
    fn new(format: ExportFormat) -> Self {
        Self {
            format,
            rows_emitted: 0,
            csv_header: None,
        }
    }

    fn encode_page(&mut self, rows: &[Row], out: &mut String) -> Result<(), DbError> {
        for row in rows {
            match self.format {
                ExportFormat::Json => self.encode_json_row(row, out)?,
                ExportFormat::Csv => self.encode_csv_row(row, out),
            }
            self.rows_emitted += 1;
        }
        Ok(())
    }

    fn encode_json_row(&self, row: &Row, out: &mut String) -> Result<(), DbError> {
        out.push(if self.rows_emitted == 0 { '[' } else { ',' });
        let text = serde_json::to_string(row)
            .map_err(|error| DbError::Execution(format!("encode row as json: {error}")))?;
        out.push_str(&text);
        Ok(())
    }

    fn encode_csv_row(&mut self, row: &Row, out: &mut String) {
        let header = self.csv_header.get_or_insert_with(|| {
            let names: Vec<String> = row.keys().cloned().collect();
            let start = out.len();
            for (index, name) in names.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                push_csv_text(out, name);
            }
            end_csv_record(out, start);
            names
        });
        let start = out.len();
        for (index, name) in header.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            if let Some(value) = row.get(name) {
                push_csv_field(out, value);
            }
        }
        end_csv_record(out, start);
    }

    fn finish(&self, out: &mut String) {
        if self.format == ExportFormat::Json {
            out.push_str(if self.rows_emitted == 0 { "[]" } else { "]" });
        }
    }
}

/// Streams one query's rows to a byte sink in bounded pages.
#[derive(Debug, Clone)]
pub struct ResultStreamer {
    active: Arc<ActiveDatabase>,
}

impl ResultStreamer {
    pub fn new(active: Arc<ActiveDatabase>) -> Self {
        Self { active }
    }

    /// Writes the full result of `sql` to `sink` as a JSON array or CSV.
    ///
    /// One connection serves the count and every page; it is released on every
    /// exit path. The task yields to the scheduler between pages. A failed
    /// write to `sink` ends the stream with [`DbError::Sink`]. Whatever was
    /// already written stays written.
    pub async fn stream<W>(
        &self,
        sql: &str,
        sink: &mut W,
        options: StreamOptions,
    ) -> Result<StreamSummary, DbError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let sql = normalize_single_statement(sql)?;
        let path = self.active.require_path()?;
        let page_size = options.page_size.max(1);

        let count_sql = format!("SELECT COUNT(*) FROM (\n{sql}\n) AS sub");
        let page_sql: Arc<str> = format!("SELECT * FROM (\n{sql}\n) AS sub LIMIT ?1 OFFSET ?2").into();

        let (mut handle, total) = run_blocking(move || {
            let handle = SqliteHandle::open(&path)?;
            let total: i64 = handle.query_row(&count_sql, [], |row| row.get(0))?;
            Ok((handle, u64::try_from(total).unwrap_or(0)))
        })
        .await?;

        debug!(
            sql_preview = %preview_sql(&sql),
            total,
            page_size,
            format = %options.format,
            "export started"
        );

        let mut session = StreamSession::new(options.format);
        let mut summary = StreamSummary {
            total_rows: total,
            ..StreamSummary::default()
        };
        let mut buffer = String::new();
        let mut offset = 0u64;

        while offset < total {
            let page_sql = Arc::clone(&page_sql);
            let (returned, rows) = run_blocking(move || {
                let rows = fetch_page(&handle, &page_sql, page_size, offset)?;
                Ok((handle, rows))
            })
            .await?;
            handle = returned;

            if rows.is_empty() {
                debug!(offset, total, "result set shrank during export");
                break;
            }

            buffer.clear();
            session.encode_page(&rows, &mut buffer)?;
            write_chunk(sink, &buffer, &mut summary).await?;
            summary.pages += 1;
            summary.rows_written += rows.len() as u64;
            offset += rows.len() as u64;
            trace!(page = summary.pages, rows = rows.len(), offset, "export page written");

            tokio::task::yield_now().await;
        }
        drop(handle);

        buffer.clear();
        session.finish(&mut buffer);
        write_chunk(sink, &buffer, &mut summary).await?;
        sink.flush()
            .await
            .map_err(|error| DbError::Sink(error.to_string()))?;

        debug!(
            rows = summary.rows_written,
            pages = summary.pages,
            bytes = summary.bytes_written,
            "export finished"
        );
        Ok(summary)
    }
}

fn fetch_page(
    conn: &Connection,
    page_sql: &str,
    limit: usize,
    offset: u64,
) -> Result<Vec<Row>, DbError> {
    let mut stmt = conn.prepare_cached(page_sql)?;
    let columns = column_names(&stmt);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map([limit, offset], |row| row_object(&columns, row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

async fn write_chunk<W>(sink: &mut W, chunk: &str, summary: &mut StreamSummary) -> Result<(), DbError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if chunk.is_empty() {
        return Ok(());
    }
    sink.write_all(chunk.as_bytes())
        .await
        .map_err(|error| DbError::Sink(error.to_string()))?;
    summary.bytes_written += chunk.len() as u64;
    Ok(())
}
