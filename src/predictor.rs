use crate::network::{ConvNet, InferenceError};
use ndarray::Array4;
use rand::Rng;

pub trait Predictor: Send + Sync + 'static {
    fn infer(&self, input: &Array4<f32>) -> Result<f32, InferenceError>;
}

impl Predictor for ConvNet {
    fn infer(&self, input: &Array4<f32>) -> Result<f32, InferenceError> {
        ConvNet::infer(self, input)
    }
}

/// Stand-in predictor used when no real model could be resolved and the
/// mock fallback is enabled. Returns a uniform random score in [0, 1);
/// downstream reporting must never present it as a calibrated diagnosis.
pub struct MockPredictor;

impl MockPredictor {
    pub const NOTE: &'static str = "This is a mock prediction for testing purposes";
}

impl Predictor for MockPredictor {
    fn infer(&self, _input: &Array4<f32>) -> Result<f32, InferenceError> {
        Ok(rand::rng().random::<f32>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_scores_stay_in_the_unit_interval() {
        let mock = MockPredictor;
        let input = Array4::<f32>::zeros((1, 64, 64, 3));
        for _ in 0..100 {
            let score = mock.infer(&input).unwrap();
            assert!((0.0..1.0).contains(&score));
        }
    }
}
