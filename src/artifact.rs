use serde::Deserialize;
use std::{fs, path::Path};
use thiserror::Error;

// Bundle layout: magic, u64 LE header length, JSON header, raw LE f32 payload.
pub const MAGIC: [u8; 4] = *b"SKN1";
pub const SCHEMA_VERSION: u32 = 2;
pub const LEGACY_SCHEMA_VERSION: u32 = 1;

const PROLOGUE_LEN: usize = MAGIC.len() + 8;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a model bundle: bad magic bytes")]
    BadMagic,
    #[error("truncated artifact: {0}")]
    Truncated(&'static str),
    #[error("weight payload is not a whole number of f32 values")]
    RaggedPayload,
    #[error("header is not valid JSON: {0}")]
    HeaderSyntax(serde_json::Error),
    #[error("header does not match the expected schema: {0}")]
    HeaderSchema(serde_json::Error),
    #[error("unsupported schema version {got}, expected {want}")]
    SchemaVersion { got: u32, want: u32 },
    #[error("batch shape must carry at least one dimension beyond the batch entry")]
    BatchShapeTooShort,
    #[error("batch shape has a dynamic entry outside the leading batch position")]
    DynamicDimension,
}

pub struct RawBundle {
    pub header: Vec<u8>,
    pub payload: Vec<f32>,
}

pub fn read_bundle(path: &Path) -> Result<RawBundle, ArtifactError> {
    let bytes = fs::read(path)?;
    parse_bundle(&bytes)
}

pub fn parse_bundle(bytes: &[u8]) -> Result<RawBundle, ArtifactError> {
    if bytes.len() < PROLOGUE_LEN {
        return Err(ArtifactError::Truncated("container prologue"));
    }
    if bytes[..MAGIC.len()] != MAGIC {
        return Err(ArtifactError::BadMagic);
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[MAGIC.len()..PROLOGUE_LEN]);
    let header_len = u64::from_le_bytes(len_bytes) as usize;

    let header_end = PROLOGUE_LEN
        .checked_add(header_len)
        .filter(|&end| end <= bytes.len())
        .ok_or(ArtifactError::Truncated("header"))?;

    let header = bytes[PROLOGUE_LEN..header_end].to_vec();
    let rest = &bytes[header_end..];
    if rest.len() % 4 != 0 {
        return Err(ArtifactError::RaggedPayload);
    }
    let payload = rest
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok(RawBundle { header, payload })
}

#[derive(Debug, Deserialize)]
pub struct Header {
    pub schema_version: u32,
    pub input_layer: InputLayer,
    pub layers: Vec<LayerConfig>,
    pub tensors: Vec<TensorSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputLayer {
    pub input_shape: Vec<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LegacyHeader {
    pub schema_version: u32,
    pub input_layer: LegacyInputLayer,
    pub layers: Vec<LayerConfig>,
    pub tensors: Vec<TensorSpec>,
}

/// Pre-v2 exports declared the model input with a leading batch entry under
/// the `batch_shape` name. The batch entry is dropped on translation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyInputLayer {
    pub batch_shape: Vec<Option<usize>>,
}

impl LegacyInputLayer {
    pub fn into_input_shape(self) -> Result<Vec<usize>, ArtifactError> {
        if self.batch_shape.len() < 2 {
            return Err(ArtifactError::BatchShapeTooShort);
        }
        self.batch_shape[1..]
            .iter()
            .map(|dim| dim.ok_or(ArtifactError::DynamicDimension))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerConfig {
    Conv2d {
        filters: usize,
        kernel_size: usize,
        #[serde(default)]
        activation: Activation,
    },
    BatchNorm,
    MaxPool {
        pool_size: usize,
    },
    Flatten,
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
}

#[derive(Debug, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

pub fn parse_header(bytes: &[u8]) -> Result<Header, ArtifactError> {
    let header: Header = serde_json::from_slice(bytes).map_err(classify_json_error)?;
    if header.schema_version != SCHEMA_VERSION {
        return Err(ArtifactError::SchemaVersion {
            got: header.schema_version,
            want: SCHEMA_VERSION,
        });
    }
    Ok(header)
}

pub fn parse_legacy_header(bytes: &[u8]) -> Result<LegacyHeader, ArtifactError> {
    let header: LegacyHeader = serde_json::from_slice(bytes).map_err(classify_json_error)?;
    if header.schema_version != LEGACY_SCHEMA_VERSION {
        return Err(ArtifactError::SchemaVersion {
            got: header.schema_version,
            want: LEGACY_SCHEMA_VERSION,
        });
    }
    Ok(header)
}

fn classify_json_error(err: serde_json::Error) -> ArtifactError {
    match err.classify() {
        serde_json::error::Category::Data => ArtifactError::HeaderSchema(err),
        _ => ArtifactError::HeaderSyntax(err),
    }
}
