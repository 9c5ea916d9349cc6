use axum::{Json, extract::rejection::JsonRejection};

use crate::app::errors;

/// Unwrap a JSON body or produce the structured `BAD_REQUEST` response.
pub fn json_body<T>(
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, axum::response::Response> {
    body.map(|Json(inner)| inner)
        .map_err(errors::json_rejection_to_response)
}
