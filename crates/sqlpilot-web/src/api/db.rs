use std::path::Path;

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::Response;
use sqlpilot_types::{StatusResponse, UploadResponse};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::app::AppState;
use crate::util::http::{attachment, db_error, json_error, json_ok, reader_body};

/// Multipart field carrying the database file.
pub const UPLOAD_FIELD: &str = "dbfile";

pub async fn api_upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    if let Err(error) = state.store.ensure_upload_dir().await {
        return db_error(&error);
    }

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(error) => {
                return json_error(
                    error.status(),
                    format!("failed to read upload: {}", error.body_text()),
                );
            }
        };
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let staged = state.store.staging_path(&file_name);
        let bytes = match write_field(field, &staged).await {
            Ok(bytes) => bytes,
            Err(error) => {
                if let Err(remove_error) = tokio::fs::remove_file(&staged).await {
                    warn!(path = %staged.display(), %remove_error, "failed to delete partial upload");
                }
                return json_error(StatusCode::BAD_REQUEST, error);
            }
        };
        info!(file_name = %file_name, bytes, "upload received");

        return match state.store.accept_upload(&staged, &file_name).await {
            Ok(active) => json_ok(&UploadResponse {
                message: "Database loaded successfully".to_string(),
                path: active.working_path.display().to_string(),
            }),
            Err(error) => db_error(&error),
        };
    }

    json_error(StatusCode::BAD_REQUEST, "No file uploaded")
}

async fn write_field(mut field: Field<'_>, path: &Path) -> Result<u64, String> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| format!("create {}: {e}", path.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| format!("failed to read upload: {}", e.body_text()))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("write {}: {e}", path.display()))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| format!("flush {}: {e}", path.display()))?;
    Ok(written)
}

pub async fn api_schema(State(state): State<AppState>) -> Response {
    match state.store.schema().await {
        Ok(schema) => json_ok(schema.as_ref()),
        Err(error) => db_error(&error),
    }
}

pub async fn api_reset(State(state): State<AppState>) -> Response {
    match state.store.reset().await {
        Ok(()) => json_ok(&StatusResponse {
            message: "Database reset to its original state".to_string(),
        }),
        Err(error) => db_error(&error),
    }
}

pub async fn api_clear(State(state): State<AppState>) -> Response {
    match state.store.clear().await {
        Ok(()) => json_ok(&StatusResponse {
            message: "Database cleared".to_string(),
        }),
        Err(error) => db_error(&error),
    }
}

pub async fn api_download(State(state): State<AppState>) -> Response {
    let path = match state.store.active().require_path() {
        Ok(path) => path,
        Err(error) => return db_error(&error),
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(error) => {
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("open {}: {error}", path.display()),
            );
        }
    };
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    attachment("application/octet-stream", &name, reader_body(file))
}
