use axum::response::Response;
use sqlpilot_types::HealthResponse;

use crate::util::http::json_ok;

pub async fn api_health() -> Response {
    json_ok(&HealthResponse {
        status: "ok".to_string(),
    })
}
