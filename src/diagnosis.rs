use crate::{
    error::RequestError,
    predictor::{MockPredictor, Predictor},
    state::ModelState,
};
use ndarray::Array4;
use serde::Serialize;

pub const ISSUE_LABEL: &str = "Potential skin issue detected";
pub const NORMAL_LABEL: &str = "Normal skin";

// Sigmoid head: scores near 0 indicate an issue, near 1 normal skin.
pub const DECISION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Serialize)]
pub struct PredictionResult {
    pub diagnosis: &'static str,
    pub prediction_value: f32,
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

pub fn classify(score: f32) -> &'static str {
    if score < DECISION_THRESHOLD {
        ISSUE_LABEL
    } else {
        NORMAL_LABEL
    }
}

/// Invokes whichever predictor the service resolved and maps its scalar to a
/// diagnosis. Mock results always carry the distinguishing note.
pub fn diagnose(
    state: &ModelState,
    tensor: &Array4<f32>,
) -> Result<PredictionResult, RequestError> {
    match state {
        ModelState::NotLoaded => Err(RequestError::ServiceUnavailable),
        ModelState::Mock(mock) => {
            let score = score_with(mock, tensor)?;
            Ok(result(score, Some(MockPredictor::NOTE)))
        }
        ModelState::Real(loaded) => {
            let score = score_with(&loaded.net, tensor)?;
            Ok(result(score, None))
        }
    }
}

fn score_with<P: Predictor>(predictor: &P, tensor: &Array4<f32>) -> Result<f32, RequestError> {
    predictor
        .infer(tensor)
        .map_err(|err| RequestError::Inference(err.to_string()))
}

fn result(score: f32, note: Option<&'static str>) -> PredictionResult {
    PredictionResult {
        diagnosis: classify(score),
        prediction_value: score,
        confidence: None,
        note,
    }
}
