use crate::{network::ConvNet, predictor::MockPredictor, resolver::LoadStrategy};

pub struct LoadedModel {
    pub net: ConvNet,
    pub strategy: LoadStrategy,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Resolved predictor for the whole process. Written exactly once before the
/// listener starts and read concurrently by every request afterwards; call
/// sites must match on the variant, so a mock can never pass as real.
pub enum ModelState {
    NotLoaded,
    Mock(MockPredictor),
    Real(LoadedModel),
}

impl ModelState {
    pub fn is_available(&self) -> bool {
        !matches!(self, ModelState::NotLoaded)
    }
}
