//! Indented JSON responses.

use crate::error::AppError;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

/// JSON body indented with four spaces, for responses people read directly.
#[derive(Debug, Clone)]
pub struct IndentedJson<T>(pub T);

impl<T: Serialize> IntoResponse for IndentedJson<T> {
    fn into_response(self) -> Response {
        let mut body = Vec::with_capacity(256);
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut body, PrettyFormatter::with_indent(b"    "));

        match self.0.serialize(&mut serializer) {
            Ok(()) => (
                StatusCode::OK,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json; charset=utf-8"),
                )],
                body,
            )
                .into_response(),
            Err(e) => AppError::internal("Failed to encode response")
                .with_source(e.into())
                .into_response(),
        }
    }
}
