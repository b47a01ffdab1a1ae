use crate::artifact::{Activation, LayerConfig, TensorSpec};
use ndarray::{s, Array1, Array2, Array3, Array4, Axis};
use thiserror::Error;

pub const KNOWN_INPUT_SHAPE: [usize; 3] = [64, 64, 3];

const BATCH_NORM_EPSILON: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("input layer must declare three dimensions, got {0:?}")]
    InputRank(Vec<usize>),
    #[error("layer {index} ({kind}) expects a feature map input")]
    ExpectsMap { index: usize, kind: &'static str },
    #[error("layer {index} (dense) requires a flattened input")]
    ExpectsVector { index: usize },
    #[error("layer {index} (conv2d) kernel does not fit the {height}x{width} feature map")]
    KernelTooLarge {
        index: usize,
        height: usize,
        width: usize,
    },
    #[error("layer {index} (max_pool) pool size {pool} exceeds the feature map")]
    PoolTooLarge { index: usize, pool: usize },
    #[error("manifest is missing a tensor for {role}")]
    MissingTensor { role: String },
    #[error("tensor `{name}` has shape {got:?}, expected {want:?}")]
    TensorShape {
        name: String,
        got: Vec<usize>,
        want: Vec<usize>,
    },
    #[error("weight payload exhausted while reading {role}")]
    PayloadExhausted { role: String },
    #[error("{trailing} unread values remain after the final tensor")]
    TrailingPayload { trailing: usize },
    #[error("{count} manifest tensors remain after the final layer")]
    TrailingManifest { count: usize },
    #[error("tensor data for {role} does not fit its declared shape")]
    ShapeData { role: String },
    #[error("network head must produce a single value")]
    BadHead,
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("predictor invoked before finalization")]
    NotFinalized,
    #[error("input tensor has shape {got:?}, expected {want:?}")]
    InputShape { got: Vec<usize>, want: Vec<usize> },
    #[error("feature kind mismatch at layer {index}")]
    FeatureKind { index: usize },
    #[error("network head produced {0} values, expected 1")]
    HeadArity(usize),
}

/// Optimization/loss settings attached after a successful load. Required
/// before invocation is permitted; carries no numeric effect on inference.
#[derive(Debug, Clone)]
pub struct CompileSettings {
    pub optimizer: String,
    pub learning_rate: f32,
    pub loss: String,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            optimizer: "adam".to_string(),
            learning_rate: 1e-3,
            loss: "binary_crossentropy".to_string(),
        }
    }
}

struct Conv2d {
    kernel: Array4<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

struct BatchNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    mean: Array1<f32>,
    variance: Array1<f32>,
}

struct MaxPool {
    size: usize,
}

struct Dense {
    kernel: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

enum Layer {
    Conv2d(Conv2d),
    BatchNorm(BatchNorm),
    MaxPool(MaxPool),
    Flatten,
    Dense(Dense),
}

enum Feature {
    Map(Array3<f32>),
    Vector(Array1<f32>),
}

fn activate_inplace<D: ndarray::Dimension>(
    values: &mut ndarray::Array<f32, D>,
    activation: Activation,
) {
    match activation {
        Activation::Linear => {}
        Activation::Relu => values.mapv_inplace(|v| v.max(0.0)),
        Activation::Sigmoid => values.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
    }
}

impl Conv2d {
    // Valid padding, stride 1, channels-last, kernel layout [kh, kw, in, out].
    fn apply(&self, x: &Array3<f32>) -> Array3<f32> {
        let (h, w, _) = x.dim();
        let (kh, kw, _, out_channels) = self.kernel.dim();
        let out_h = h - kh + 1;
        let out_w = w - kw + 1;

        let mut out = Array3::<f32>::zeros((out_h, out_w, out_channels));
        for oy in 0..out_h {
            for ox in 0..out_w {
                let window = x.slice(s![oy..oy + kh, ox..ox + kw, ..]);
                for oc in 0..out_channels {
                    let kernel = self.kernel.slice(s![.., .., .., oc]);
                    let mut acc = self.bias[oc];
                    for (value, weight) in window.iter().zip(kernel.iter()) {
                        acc += value * weight;
                    }
                    out[[oy, ox, oc]] = acc;
                }
            }
        }
        activate_inplace(&mut out, self.activation);
        out
    }
}

impl BatchNorm {
    fn apply(&self, x: &mut Array3<f32>) {
        for (c, mut lane) in x.axis_iter_mut(Axis(2)).enumerate() {
            let scale = self.gamma[c] / (self.variance[c] + BATCH_NORM_EPSILON).sqrt();
            let shift = self.beta[c] - self.mean[c] * scale;
            lane.mapv_inplace(|v| v * scale + shift);
        }
    }
}

impl MaxPool {
    fn apply(&self, x: &Array3<f32>) -> Array3<f32> {
        let (h, w, channels) = x.dim();
        let out_h = h / self.size;
        let out_w = w / self.size;

        let mut out = Array3::<f32>::zeros((out_h, out_w, channels));
        for oy in 0..out_h {
            for ox in 0..out_w {
                for c in 0..channels {
                    let mut best = f32::NEG_INFINITY;
                    for dy in 0..self.size {
                        for dx in 0..self.size {
                            best = best.max(x[[oy * self.size + dy, ox * self.size + dx, c]]);
                        }
                    }
                    out[[oy, ox, c]] = best;
                }
            }
        }
        out
    }
}

impl Dense {
    fn apply(&self, x: &Array1<f32>) -> Array1<f32> {
        let mut out = x.dot(&self.kernel) + &self.bias;
        activate_inplace(&mut out, self.activation);
        out
    }
}

fn flatten(x: &Array3<f32>) -> Array1<f32> {
    x.iter().copied().collect()
}

impl Layer {
    fn apply(&self, feature: Feature, index: usize) -> Result<Feature, InferenceError> {
        match (self, feature) {
            (Layer::Conv2d(conv), Feature::Map(x)) => Ok(Feature::Map(conv.apply(&x))),
            (Layer::BatchNorm(norm), Feature::Map(mut x)) => {
                norm.apply(&mut x);
                Ok(Feature::Map(x))
            }
            (Layer::MaxPool(pool), Feature::Map(x)) => Ok(Feature::Map(pool.apply(&x))),
            (Layer::Flatten, Feature::Map(x)) => Ok(Feature::Vector(flatten(&x))),
            (Layer::Dense(dense), Feature::Vector(x)) => Ok(Feature::Vector(dense.apply(&x))),
            _ => Err(InferenceError::FeatureKind { index }),
        }
    }
}

pub struct ConvNet {
    input_shape: [usize; 3],
    layers: Vec<Layer>,
    compile: Option<CompileSettings>,
}

impl ConvNet {
    pub fn finalize(&mut self, settings: CompileSettings) {
        self.compile = Some(settings);
    }

    pub fn compile_settings(&self) -> Option<&CompileSettings> {
        self.compile.as_ref()
    }

    pub fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    pub fn infer(&self, input: &Array4<f32>) -> Result<f32, InferenceError> {
        if self.compile.is_none() {
            return Err(InferenceError::NotFinalized);
        }

        let want = [
            1,
            self.input_shape[0],
            self.input_shape[1],
            self.input_shape[2],
        ];
        if input.shape() != want {
            return Err(InferenceError::InputShape {
                got: input.shape().to_vec(),
                want: want.to_vec(),
            });
        }

        let mut feature = Feature::Map(input.index_axis(Axis(0), 0).to_owned());
        for (index, layer) in self.layers.iter().enumerate() {
            feature = layer.apply(feature, index)?;
        }

        match feature {
            Feature::Vector(v) if v.len() == 1 => Ok(v[0]),
            Feature::Vector(v) => Err(InferenceError::HeadArity(v.len())),
            Feature::Map(m) => Err(InferenceError::HeadArity(m.len())),
        }
    }
}

/// The architecture assumed by the weights-only recovery path. Fixed; not a
/// general recovery mechanism.
pub fn known_layer_stack() -> Vec<LayerConfig> {
    vec![
        LayerConfig::Conv2d {
            filters: 32,
            kernel_size: 3,
            activation: Activation::Relu,
        },
        LayerConfig::BatchNorm,
        LayerConfig::Conv2d {
            filters: 32,
            kernel_size: 3,
            activation: Activation::Relu,
        },
        LayerConfig::BatchNorm,
        LayerConfig::MaxPool { pool_size: 2 },
        LayerConfig::Flatten,
        LayerConfig::Dense {
            units: 100,
            activation: Activation::Relu,
        },
        LayerConfig::Dense {
            units: 120,
            activation: Activation::Relu,
        },
        LayerConfig::Dense {
            units: 1,
            activation: Activation::Sigmoid,
        },
    ]
}

pub fn reconstruct_known(payload: &[f32]) -> Result<ConvNet, BuildError> {
    assemble(&KNOWN_INPUT_SHAPE, &known_layer_stack(), None, payload)
}

/// Builds a network from layer configs, drawing weight tensors from the
/// payload in order. With a manifest, each tensor's declared name and shape
/// are checked; without one, values are sliced purely by position.
pub fn assemble(
    input_shape: &[usize],
    layers: &[LayerConfig],
    manifest: Option<&[TensorSpec]>,
    payload: &[f32],
) -> Result<ConvNet, BuildError> {
    let input_shape: [usize; 3] = match *input_shape {
        [h, w, c] => [h, w, c],
        _ => return Err(BuildError::InputRank(input_shape.to_vec())),
    };

    let mut reader = TensorReader::new(manifest, payload);
    let mut shape = FeatureShape::Map(input_shape[0], input_shape[1], input_shape[2]);
    let mut built = Vec::with_capacity(layers.len());

    for (index, config) in layers.iter().enumerate() {
        let (layer, next_shape) = build_layer(config, index, shape, &mut reader)?;
        built.push(layer);
        shape = next_shape;
    }

    if !matches!(shape, FeatureShape::Vector(1)) {
        return Err(BuildError::BadHead);
    }
    reader.finish()?;

    Ok(ConvNet {
        input_shape,
        layers: built,
        compile: None,
    })
}

#[derive(Clone, Copy)]
enum FeatureShape {
    Map(usize, usize, usize),
    Vector(usize),
}

fn build_layer(
    config: &LayerConfig,
    index: usize,
    shape: FeatureShape,
    reader: &mut TensorReader<'_>,
) -> Result<(Layer, FeatureShape), BuildError> {
    match *config {
        LayerConfig::Conv2d {
            filters,
            kernel_size,
            activation,
        } => {
            let (h, w, c) = expect_map(shape, index, "conv2d")?;
            if h < kernel_size || w < kernel_size {
                return Err(BuildError::KernelTooLarge {
                    index,
                    height: h,
                    width: w,
                });
            }
            let kernel = reader.take4(
                format!("layer {index} conv2d kernel"),
                [kernel_size, kernel_size, c, filters],
            )?;
            let bias = reader.take1(format!("layer {index} conv2d bias"), filters)?;
            let next = FeatureShape::Map(h - kernel_size + 1, w - kernel_size + 1, filters);
            Ok((
                Layer::Conv2d(Conv2d {
                    kernel,
                    bias,
                    activation,
                }),
                next,
            ))
        }
        LayerConfig::BatchNorm => {
            let (h, w, c) = expect_map(shape, index, "batch_norm")?;
            let gamma = reader.take1(format!("layer {index} batch_norm gamma"), c)?;
            let beta = reader.take1(format!("layer {index} batch_norm beta"), c)?;
            let mean = reader.take1(format!("layer {index} batch_norm moving_mean"), c)?;
            let variance = reader.take1(format!("layer {index} batch_norm moving_variance"), c)?;
            Ok((
                Layer::BatchNorm(BatchNorm {
                    gamma,
                    beta,
                    mean,
                    variance,
                }),
                FeatureShape::Map(h, w, c),
            ))
        }
        LayerConfig::MaxPool { pool_size } => {
            let (h, w, c) = expect_map(shape, index, "max_pool")?;
            if pool_size == 0 || h < pool_size || w < pool_size {
                return Err(BuildError::PoolTooLarge {
                    index,
                    pool: pool_size,
                });
            }
            Ok((
                Layer::MaxPool(MaxPool { size: pool_size }),
                FeatureShape::Map(h / pool_size, w / pool_size, c),
            ))
        }
        LayerConfig::Flatten => {
            let (h, w, c) = expect_map(shape, index, "flatten")?;
            Ok((Layer::Flatten, FeatureShape::Vector(h * w * c)))
        }
        LayerConfig::Dense { units, activation } => {
            let inputs = match shape {
                FeatureShape::Vector(n) => n,
                FeatureShape::Map(..) => return Err(BuildError::ExpectsVector { index }),
            };
            let kernel = reader.take2(format!("layer {index} dense kernel"), [inputs, units])?;
            let bias = reader.take1(format!("layer {index} dense bias"), units)?;
            Ok((
                Layer::Dense(Dense {
                    kernel,
                    bias,
                    activation,
                }),
                FeatureShape::Vector(units),
            ))
        }
    }
}

fn expect_map(
    shape: FeatureShape,
    index: usize,
    kind: &'static str,
) -> Result<(usize, usize, usize), BuildError> {
    match shape {
        FeatureShape::Map(h, w, c) => Ok((h, w, c)),
        FeatureShape::Vector(_) => Err(BuildError::ExpectsMap { index, kind }),
    }
}

struct TensorReader<'a> {
    manifest: Option<&'a [TensorSpec]>,
    next_entry: usize,
    payload: &'a [f32],
    offset: usize,
}

impl<'a> TensorReader<'a> {
    fn new(manifest: Option<&'a [TensorSpec]>, payload: &'a [f32]) -> Self {
        Self {
            manifest,
            next_entry: 0,
            payload,
            offset: 0,
        }
    }

    fn take(&mut self, role: String, want: &[usize]) -> Result<&'a [f32], BuildError> {
        if let Some(manifest) = self.manifest {
            let spec = manifest
                .get(self.next_entry)
                .ok_or_else(|| BuildError::MissingTensor { role: role.clone() })?;
            if spec.shape != want {
                return Err(BuildError::TensorShape {
                    name: spec.name.clone(),
                    got: spec.shape.clone(),
                    want: want.to_vec(),
                });
            }
            self.next_entry += 1;
        }

        let len: usize = want.iter().product();
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.payload.len())
            .ok_or(BuildError::PayloadExhausted { role })?;
        let slice = &self.payload[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take1(&mut self, role: String, len: usize) -> Result<Array1<f32>, BuildError> {
        let slice = self.take(role, &[len])?;
        Ok(Array1::from_vec(slice.to_vec()))
    }

    fn take2(&mut self, role: String, shape: [usize; 2]) -> Result<Array2<f32>, BuildError> {
        let slice = self.take(role.clone(), &shape)?;
        Array2::from_shape_vec((shape[0], shape[1]), slice.to_vec())
            .map_err(|_| BuildError::ShapeData { role })
    }

    fn take4(&mut self, role: String, shape: [usize; 4]) -> Result<Array4<f32>, BuildError> {
        let slice = self.take(role.clone(), &shape)?;
        Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]), slice.to_vec())
            .map_err(|_| BuildError::ShapeData { role })
    }

    fn finish(self) -> Result<(), BuildError> {
        if let Some(manifest) = self.manifest {
            let count = manifest.len().saturating_sub(self.next_entry);
            if count > 0 {
                return Err(BuildError::TrailingManifest { count });
            }
        }
        let trailing = self.payload.len() - self.offset;
        if trailing > 0 {
            return Err(BuildError::TrailingPayload { trailing });
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn tensor_from(values: &[f32], shape: (usize, usize, usize, usize)) -> Array4<f32> {
        Array4::from_shape_vec(shape, values.to_vec()).unwrap()
    }

    #[test]
    fn conv_layer_computes_a_valid_correlation() {
        let layers = vec![
            LayerConfig::Conv2d {
                filters: 1,
                kernel_size: 3,
                activation: Activation::Linear,
            },
            LayerConfig::Flatten,
            LayerConfig::Dense {
                units: 1,
                activation: Activation::Linear,
            },
        ];
        // conv kernel of ones, zero bias; dense is the identity.
        let mut payload = vec![1.0f32; 9];
        payload.push(0.0);
        payload.extend([1.0, 0.0]);

        let mut net = assemble(&[3, 3, 1], &layers, None, &payload).unwrap();
        net.finalize(CompileSettings::default());

        let input = tensor_from(
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
            (1, 3, 3, 1),
        );
        let score = net.infer(&input).unwrap();
        assert!((score - 45.0).abs() < 1e-5);
    }

    #[test]
    fn batch_norm_applies_the_inference_transform() {
        let layers = vec![
            LayerConfig::BatchNorm,
            LayerConfig::Flatten,
            LayerConfig::Dense {
                units: 1,
                activation: Activation::Linear,
            },
        ];
        // gamma=2, beta=1, mean=3, variance=4 over a single 1x1 channel.
        let payload = vec![2.0, 1.0, 3.0, 4.0, 1.0, 0.0];
        let mut net = assemble(&[1, 1, 1], &layers, None, &payload).unwrap();
        net.finalize(CompileSettings::default());

        let score = net.infer(&tensor_from(&[5.0], (1, 1, 1, 1))).unwrap();
        let expected = 2.0 * (5.0 - 3.0) / (4.0f32 + BATCH_NORM_EPSILON).sqrt() + 1.0;
        assert!((score - expected).abs() < 1e-5);
    }

    #[test]
    fn max_pool_keeps_the_largest_value_per_window() {
        let layers = vec![
            LayerConfig::MaxPool { pool_size: 2 },
            LayerConfig::Flatten,
            LayerConfig::Dense {
                units: 1,
                activation: Activation::Linear,
            },
        ];
        let payload = vec![1.0, 0.0];
        let mut net = assemble(&[2, 2, 1], &layers, None, &payload).unwrap();
        net.finalize(CompileSettings::default());

        let score = net
            .infer(&tensor_from(&[0.5, -2.0, 7.5, 3.0], (1, 2, 2, 1)))
            .unwrap();
        assert!((score - 7.5).abs() < 1e-6);
    }

    #[test]
    fn known_architecture_loads_by_position() {
        let expected = 3 * 3 * 3 * 32
            + 32
            + 4 * 32
            + 3 * 3 * 32 * 32
            + 32
            + 4 * 32
            + 28_800 * 100
            + 100
            + 100 * 120
            + 120
            + 120
            + 1;
        let mut net = reconstruct_known(&vec![0.0; expected]).unwrap();
        net.finalize(CompileSettings::default());
        assert_eq!(net.input_shape(), KNOWN_INPUT_SHAPE);

        // All-zero weights push every logit to 0, so the sigmoid head lands
        // exactly on the 0.5 boundary.
        let input = Array4::<f32>::zeros((1, 64, 64, 3));
        let score = net.infer(&input).unwrap();
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn known_architecture_rejects_a_short_payload() {
        assert!(matches!(
            reconstruct_known(&[0.0; 10]),
            Err(BuildError::PayloadExhausted { .. })
        ));
    }

    #[test]
    fn trailing_payload_values_are_rejected() {
        let layers = vec![
            LayerConfig::Flatten,
            LayerConfig::Dense {
                units: 1,
                activation: Activation::Sigmoid,
            },
        ];
        let result = assemble(&[1, 1, 1], &layers, None, &[0.0, 0.0, 99.0]);
        assert!(matches!(
            result,
            Err(BuildError::TrailingPayload { trailing: 1 })
        ));
    }

    #[test]
    fn inference_requires_finalization() {
        let layers = vec![
            LayerConfig::Flatten,
            LayerConfig::Dense {
                units: 1,
                activation: Activation::Sigmoid,
            },
        ];
        let net = assemble(&[1, 1, 1], &layers, None, &[0.0, 0.0]).unwrap();
        let err = net.infer(&Array4::zeros((1, 1, 1, 1))).unwrap_err();
        assert!(matches!(err, InferenceError::NotFinalized));
    }

    #[test]
    fn inference_rejects_a_mismatched_input_shape() {
        let net = test_support::scalar_net(0.5);
        let err = net.infer(&Array4::zeros((1, 2, 2, 1))).unwrap_err();
        assert!(matches!(err, InferenceError::InputShape { .. }));
    }

    #[test]
    fn scalar_net_hits_the_requested_score() {
        let net = test_support::scalar_net(0.3);
        let score = net.infer(&Array4::zeros((1, 1, 1, 1))).unwrap();
        assert!((score - 0.3).abs() < 1e-6);
    }
}
