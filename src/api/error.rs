use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Uniform error envelope: `{"error": {"code": ..., "message": ...}}`.
pub fn envelope(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": { "code": code, "message": message }
        })),
    )
        .into_response()
}

/// 400 with a parameter-level code.
pub fn bad_request(code: &str, message: &str) -> Response {
    envelope(StatusCode::BAD_REQUEST, code, message)
}

/// 503 used when the ring buffer has not seen a snapshot yet.
pub fn no_data() -> Response {
    envelope(
        StatusCode::SERVICE_UNAVAILABLE,
        "no_data",
        "no snapshot collected yet",
    )
}

/// Return a generic 500 envelope, logging the real error server-side.
pub fn internal_error(context: &str, err: impl std::fmt::Display) -> Response {
    error!(context = context, error = %err, "Internal error");
    envelope(
        StatusCode::INTERNAL_SERVER_ERROR,
        "io_error",
        "internal server error",
    )
}

/// Validate an integer query parameter against an inclusive range.
pub fn validate_range(name: &str, value: u32, min: u32, max: u32) -> Result<u32, Response> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(bad_request(
            "invalid_parameter",
            &format!("{name} must be in [{min}, {max}], got {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_range_accepts_bounds() {
        assert!(validate_range("hours", 1, 1, 168).is_ok());
        assert!(validate_range("hours", 168, 1, 168).is_ok());
    }

    #[test]
    fn validate_range_rejects_outside() {
        assert!(validate_range("hours", 0, 1, 168).is_err());
        assert!(validate_range("hours", 169, 1, 168).is_err());
    }
}
