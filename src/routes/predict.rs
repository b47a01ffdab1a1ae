use crate::{
    diagnosis::{self, PredictionResult},
    error::RequestError,
    imaging,
    server::SharedState,
};
use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use image::RgbImage;
use serde::Deserialize;
use tracing::instrument;

#[derive(Deserialize)]
struct EmbeddedPayload {
    image_data: Option<String>,
}

/// Dual-channel prediction endpoint: a JSON body carries the embedded data
/// URI, a multipart body carries the uploaded file. The embedded channel is
/// consulted first.
#[instrument(skip_all)]
pub async fn predict(State(state): State<SharedState>, request: Request) -> Response {
    match run_predict(&state, request).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn run_predict(
    state: &SharedState,
    request: Request,
) -> Result<PredictionResult, RequestError> {
    if !state.model.is_available() {
        return Err(RequestError::ServiceUnavailable);
    }

    let image = decode_request(request).await?;
    let tensor = imaging::normalize(&image);
    diagnosis::diagnose(state.model.as_ref(), &tensor)
}

async fn decode_request(request: Request) -> Result<RgbImage, RequestError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("application/json") {
        let Json(body) = Json::<EmbeddedPayload>::from_request(request, &())
            .await
            .map_err(|err| RequestError::InvalidBody(err.to_string()))?;
        let payload = body.image_data.ok_or(RequestError::NoImageProvided)?;
        imaging::decode_base64_payload(&payload)
    } else if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|err| RequestError::InvalidBody(err.to_string()))?;
        decode_multipart(multipart, RequestError::NoImageProvided).await
    } else {
        Err(RequestError::NoImageProvided)
    }
}

/// Upload-only endpoint kept alongside the dual-channel one; rejects
/// requests that never carried a `file` field.
#[instrument(skip_all)]
pub async fn upload(State(state): State<SharedState>, multipart: Multipart) -> Response {
    match run_upload(&state, multipart).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn run_upload(
    state: &SharedState,
    multipart: Multipart,
) -> Result<PredictionResult, RequestError> {
    if !state.model.is_available() {
        return Err(RequestError::ServiceUnavailable);
    }

    let image = decode_multipart(multipart, RequestError::NoFileUploaded).await?;
    let tensor = imaging::normalize(&image);
    diagnosis::diagnose(state.model.as_ref(), &tensor)
}

async fn decode_multipart(
    mut multipart: Multipart,
    missing_field: RequestError,
) -> Result<RgbImage, RequestError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| RequestError::InvalidBody(err.to_string()))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data: Bytes = field
                .bytes()
                .await
                .map_err(|err| RequestError::InvalidBody(err.to_string()))?;
            return imaging::decode_upload(&filename, &data);
        }
    }

    Err(missing_field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{imaging::test_support::png_bytes, predictor::MockPredictor, state::ModelState};
    use axum::body::Body;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use std::sync::Arc;

    const BOUNDARY: &str = "XBOUNDARYX";

    fn mock_state() -> SharedState {
        SharedState {
            model: Arc::new(ModelState::Mock(MockPredictor)),
        }
    }

    fn unloaded_state() -> SharedState {
        SharedState {
            model: Arc::new(ModelState::NotLoaded),
        }
    }

    fn json_request(body: serde_json::Value) -> Request {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_request(filename: &str, bytes: &[u8]) -> Request {
        multipart_request_with("file", filename, bytes)
    }

    fn multipart_request_with(name: &str, filename: &str, bytes: &[u8]) -> Request {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn json_channel_produces_a_diagnosis() {
        let png = png_bytes(4, 4, [120, 40, 200]);
        let payload = format!("data:image/png;base64,{}", BASE64.encode(&png));
        let request = json_request(serde_json::json!({ "image_data": payload }));

        let response = predict(State(mock_state()), request).await;
        let body = body_json(response).await;

        assert!(body["diagnosis"].is_string());
        assert_eq!(body["confidence"], serde_json::Value::Null);
        assert_eq!(body["note"], MockPredictor::NOTE);
    }

    #[tokio::test]
    async fn json_body_without_image_data_is_rejected() {
        let request = json_request(serde_json::json!({ "something_else": 1 }));
        let response = predict(State(mock_state()), request).await;
        let body = body_json(response).await;

        assert_eq!(body, serde_json::json!({ "error": "No image provided" }));
    }

    #[tokio::test]
    async fn upload_channel_produces_a_diagnosis() {
        let png = png_bytes(4, 4, [5, 5, 5]);
        let request = multipart_request("lesion.png", &png);

        let response = predict(State(mock_state()), request).await;
        let body = body_json(response).await;

        assert!(body["prediction_value"].is_number());
    }

    #[tokio::test]
    async fn empty_upload_filename_returns_no_file_selected() {
        let png = png_bytes(4, 4, [5, 5, 5]);
        let request = multipart_request("", &png);

        let response = predict(State(mock_state()), request).await;
        let body = body_json(response).await;

        assert_eq!(body, serde_json::json!({ "error": "No file selected" }));
    }

    #[tokio::test]
    async fn upload_requires_a_file_field() {
        let png = png_bytes(4, 4, [5, 5, 5]);
        let request = multipart_request_with("other", "lesion.png", &png);
        let multipart = Multipart::from_request(request, &()).await.unwrap();

        let response = upload(State(mock_state()), multipart).await;
        let body = body_json(response).await;

        assert_eq!(body, serde_json::json!({ "error": "No file uploaded" }));
    }

    #[tokio::test]
    async fn requests_fail_while_the_model_is_not_loaded() {
        let png = png_bytes(4, 4, [5, 5, 5]);
        let request = multipart_request("lesion.png", &png);

        let response = predict(State(unloaded_state()), request).await;
        assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
