use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Per-request failures. Every variant is reported to the caller as a
/// structured `{"error": ...}` payload, never as a bare transport failure.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Model not loaded. Please restart the service and check the startup logs.")]
    ServiceUnavailable,
    #[error("No image provided")]
    NoImageProvided,
    #[error("No file uploaded")]
    NoFileUploaded,
    #[error("No file selected")]
    NoFileProvided,
    #[error("Malformed image payload: expected a comma-separated data URI")]
    MalformedPayload,
    #[error("Could not decode image: {0}")]
    UndecodableImage(#[from] image::ImageError),
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Prediction error: {0}")]
    Inference(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl RequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            RequestError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            RequestError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
