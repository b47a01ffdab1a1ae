use crate::{
    artifact::{self, ArtifactError, RawBundle},
    config::ModelSettings,
    network::{self, BuildError, CompileSettings, ConvNet},
    predictor::MockPredictor,
    state::{LoadedModel, ModelState},
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Load strategies in the order they are attempted. Iteration stops at the
/// first success; the next strategy runs only after the previous one failed.
pub const STRATEGIES: [LoadStrategy; 3] = [
    LoadStrategy::Direct,
    LoadStrategy::InputShim,
    LoadStrategy::WeightsOnly,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    Direct,
    InputShim,
    WeightsOnly,
}

impl LoadStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            LoadStrategy::Direct => "direct",
            LoadStrategy::InputShim => "input-shim",
            LoadStrategy::WeightsOnly => "weights-only",
        }
    }
}

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Build(#[from] BuildError),
}

#[derive(Debug)]
pub struct Attempt {
    pub strategy: LoadStrategy,
    pub error: StrategyError,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("model artifact not found at {0}")]
    ArtifactMissing(PathBuf),
    #[error("model format unsupported: {0}")]
    FormatUnsupported(FormatFailure),
}

#[derive(Error, Debug)]
pub enum FormatFailure {
    #[error("unreadable container: {0}")]
    Container(ArtifactError),
    #[error("all load strategies failed: {}", describe_attempts(.0))]
    Exhausted(Vec<Attempt>),
}

fn describe_attempts(attempts: &[Attempt]) -> String {
    attempts
        .iter()
        .map(|attempt| format!("{}: {}", attempt.strategy.name(), attempt.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolves the configured artifact into the process-wide model state.
/// Failures degrade to the mock predictor only when the configuration
/// explicitly allows it; otherwise they abort startup.
pub fn resolve_model(settings: &ModelSettings) -> Result<ModelState, ResolveError> {
    match load_predictor(&settings.artifact_path()) {
        Ok(loaded) => Ok(ModelState::Real(loaded)),
        Err(err) if settings.mock_fallback => {
            tracing::warn!(error = %err, "model resolution failed, continuing with mock predictor");
            Ok(ModelState::Mock(MockPredictor))
        }
        Err(err) => Err(err),
    }
}

pub fn load_predictor(path: &Path) -> Result<LoadedModel, ResolveError> {
    if !path.exists() {
        return Err(ResolveError::ArtifactMissing(path.to_path_buf()));
    }

    let bundle = artifact::read_bundle(path)
        .map_err(|err| ResolveError::FormatUnsupported(FormatFailure::Container(err)))?;

    let mut attempts = Vec::new();
    for strategy in STRATEGIES {
        match try_strategy(strategy, &bundle) {
            Ok(mut net) => {
                let settings = CompileSettings::default();
                tracing::info!(
                    strategy = strategy.name(),
                    optimizer = %settings.optimizer,
                    loss = %settings.loss,
                    "model loaded"
                );
                net.finalize(settings);
                return Ok(LoadedModel { net, strategy });
            }
            Err(error) => {
                tracing::warn!(
                    strategy = strategy.name(),
                    error = %error,
                    "load strategy failed"
                );
                attempts.push(Attempt { strategy, error });
            }
        }
    }

    Err(ResolveError::FormatUnsupported(FormatFailure::Exhausted(
        attempts,
    )))
}

fn try_strategy(strategy: LoadStrategy, bundle: &RawBundle) -> Result<ConvNet, StrategyError> {
    match strategy {
        LoadStrategy::Direct => {
            let header = artifact::parse_header(&bundle.header)?;
            let net = network::assemble(
                &header.input_layer.input_shape,
                &header.layers,
                Some(&header.tensors),
                &bundle.payload,
            )?;
            Ok(net)
        }
        LoadStrategy::InputShim => {
            let header = artifact::parse_legacy_header(&bundle.header)?;
            let input_shape = header.input_layer.into_input_shape()?;
            let net = network::assemble(
                &input_shape,
                &header.layers,
                Some(&header.tensors),
                &bundle.payload,
            )?;
            Ok(net)
        }
        LoadStrategy::WeightsOnly => {
            let net = network::reconstruct_known(&bundle.payload)?;
            Ok(net)
        }
    }
}
