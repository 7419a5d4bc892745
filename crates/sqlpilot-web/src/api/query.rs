use axum::body::{Body, Bytes};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use sqlpilot_db::{DbError, StreamOptions, batch_changes_schema, preview_sql};
use sqlpilot_types::{ExportFormat, ExportQuery, RunQueryRequest, RunQueryResponse};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::util::http::{attachment, db_error, json_error, json_ok, prefixed_reader_body};

/// Capacity of the pipe between the export task and the response body.
const EXPORT_PIPE_BYTES: usize = 256 * 1024;
const FIRST_CHUNK_BYTES: usize = 64 * 1024;

pub async fn api_run(State(state): State<AppState>, body: Bytes) -> Response {
    let request: RunQueryRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                format!("invalid request json: {error}"),
            );
        }
    };
    if request.sql.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "SQL query is required");
    }

    let result = match state.executor.execute(&request.sql, &request.params).await {
        Ok(result) => result,
        Err(error) => {
            debug!(sql_preview = %preview_sql(&request.sql), %error, "query failed");
            return db_error(&error);
        }
    };
    if batch_changes_schema(&result)
        && let Err(error) = state.store.refresh_schema().await
    {
        warn!(%error, "failed to refresh schema after ddl");
    }
    json_ok(&RunQueryResponse { result })
}

/// Streams a query's rows as a downloadable file.
///
/// Headers are sent once the first chunk exists. An error before that is
/// answered as JSON; an error after it truncates the body.
pub async fn api_export(
    State(state): State<AppState>,
    Path(format): Path<String>,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> Response {
    let format: ExportFormat = match format.parse() {
        Ok(format) => format,
        Err(error) => return json_error(StatusCode::BAD_REQUEST, error),
    };
    let Ok(Query(ExportQuery { sql })) = query else {
        return json_error(StatusCode::BAD_REQUEST, "SQL query is required");
    };

    let options = StreamOptions::new(format).with_page_size(state.config.export_page_size);
    let (mut writer, mut reader) = tokio::io::duplex(EXPORT_PIPE_BYTES);
    let streamer = state.streamer.clone();
    let export = tokio::spawn(async move {
        let result = streamer.stream(&sql, &mut writer, options).await;
        match &result {
            Ok(summary) => debug!(
                sql_preview = %preview_sql(&sql),
                rows = summary.rows_written,
                pages = summary.pages,
                "export complete"
            ),
            Err(DbError::Sink(error)) => debug!(%error, "export client went away"),
            Err(error) => warn!(sql_preview = %preview_sql(&sql), %error, "export failed"),
        }
        result
    });

    let mut first = vec![0u8; FIRST_CHUNK_BYTES];
    let read = match reader.read(&mut first).await {
        Ok(read) => read,
        Err(error) => {
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("export pipe error: {error}"),
            );
        }
    };

    if read == 0 {
        return match export.await {
            Ok(Ok(_)) => attachment(format.content_type(), &format.attachment_name(), Body::empty()),
            Ok(Err(error)) => db_error(&error),
            Err(error) => json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("export worker join error: {error}"),
            ),
        };
    }

    first.truncate(read);
    attachment(
        format.content_type(),
        &format.attachment_name(),
        prefixed_reader_body(Bytes::from(first), reader),
    )
}
