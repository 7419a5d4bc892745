use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Serialize;
use sqlpilot_db::DbError;
use sqlpilot_types::ApiError;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK_BYTES: usize = 64 * 1024;
const FALLBACK_ATTACHMENT_NAME: &str = "database.db";

pub fn json_ok<T>(value: &T) -> Response
where
    T: Serialize + ?Sized,
{
    json_with_status(StatusCode::OK, value)
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    json_with_status(
        status,
        &ApiError {
            error: message.into(),
        },
    )
}

pub fn json_with_status<T>(status: StatusCode, value: &T) -> Response
where
    T: Serialize + ?Sized,
{
    match serde_json::to_string(value) {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("json encode error: {error}"),
        )
            .into_response(),
    }
}

pub fn status_for(error: &DbError) -> StatusCode {
    match error {
        DbError::InvalidDatabaseFile(_) | DbError::NoDatabaseLoaded | DbError::Execution(_) => {
            StatusCode::BAD_REQUEST
        }
        DbError::NoSnapshotAvailable | DbError::Storage(_) | DbError::Sink(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn db_error(error: &DbError) -> Response {
    json_error(status_for(error), error.to_string())
}

/// `attachment; filename="..."`, with quotes and control characters replaced.
pub fn attachment_disposition(file_name: &str) -> HeaderValue {
    let cleaned: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{cleaned}\"")).unwrap_or_else(|_| {
        HeaderValue::from_static("attachment; filename=\"database.db\"")
    })
}

pub fn attachment(content_type: &'static str, file_name: &str, body: Body) -> Response {
    let name = if file_name.is_empty() {
        FALLBACK_ATTACHMENT_NAME
    } else {
        file_name
    };
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, attachment_disposition(name)),
        ],
        body,
    )
        .into_response()
}

fn read_chunks<R>(reader: R) -> BoxStream<'static, std::io::Result<Bytes>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(reader)))
            }
            Err(error) => Some((Err(error), None)),
        }
    })
    .boxed()
}

/// A response body that forwards `reader` until EOF.
pub fn reader_body<R>(reader: R) -> Body
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Body::from_stream(read_chunks(reader))
}

/// Like [`reader_body`], with bytes already taken from the reader sent first.
pub fn prefixed_reader_body<R>(prefix: Bytes, reader: R) -> Body
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let head = stream::once(async move { Ok::<_, std::io::Error>(prefix) });
    Body::from_stream(head.chain(read_chunks(reader)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_errors_map_to_client_or_server_status() {
        assert_eq!(status_for(&DbError::NoDatabaseLoaded), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&DbError::InvalidDatabaseFile("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&DbError::Execution("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&DbError::NoSnapshotAvailable),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&DbError::Storage("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn disposition_escapes_quotes() {
        assert_eq!(
            attachment_disposition("a\"b.csv"),
            HeaderValue::from_static("attachment; filename=\"a_b.csv\"")
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn prefixed_body_replays_prefix_then_reader() {
        let body = prefixed_reader_body(Bytes::from_static(b"[1"), &b",2]"[..]);
        let bytes = axum::body::to_bytes(body, usize::MAX).await.expect("body");
        assert_eq!(&bytes[..], b"[1,2]");
    }
}
