/**
 * Error Conversion
 *
 * `IntoResponse` for `BackendError`, so handlers can return it directly.
 *
 * # Response Format
 *
 * ```json
 * {
 *   "error": "session for document page-1 is closing",
 *   "status": 503,
 *   "code": "SESSION_CLOSING"
 * }
 * ```
 *
 * `code` is present only when the failure has a wire error code.
 */
use axum::{
    response::{IntoResponse, Response},
    Json,
};

use crate::backend::error::types::BackendError;

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("[HTTP] {} {}", status.as_u16(), self);
        }

        let mut body = serde_json::json!({
            "error": self.message(),
            "status": status.as_u16(),
        });
        if let Some(code) = self.error_code() {
            body["code"] = serde_json::Value::String(code.as_str().to_string());
        }

        (status, Json(body)).into_response()
    }
}
