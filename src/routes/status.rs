use crate::{server::SharedState, state::ModelState};
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct ModelStatus {
    status: &'static str,
    message: &'static str,
}

pub async fn model_status(State(state): State<SharedState>) -> Json<ModelStatus> {
    let (status, message) = match state.model.as_ref() {
        ModelState::NotLoaded => ("error", "Model not loaded"),
        ModelState::Mock(_) => ("success", "Mock model is loaded for testing"),
        ModelState::Real(_) => ("success", "AI Model loaded and ready for analysis"),
    };

    Json(ModelStatus { status, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::MockPredictor;
    use std::sync::Arc;

    async fn probe(model: ModelState) -> serde_json::Value {
        let state = SharedState {
            model: Arc::new(model),
        };
        let Json(status) = model_status(State(state)).await;
        serde_json::to_value(status).unwrap()
    }

    #[tokio::test]
    async fn mock_state_reports_the_mock_message() {
        let body = probe(ModelState::Mock(MockPredictor)).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "Mock model is loaded for testing");
    }

    #[tokio::test]
    async fn unloaded_state_reports_an_error() {
        let body = probe(ModelState::NotLoaded).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Model not loaded");
    }
}
