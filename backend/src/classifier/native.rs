//! Pure Rust evaluation of a sequential convolutional network.
//!
//! The artifact is a single JSON document holding the layer stack and its
//! weights. `tools/export_keras_model.py` writes it from a trained Keras
//! `Sequential` (`.h5`) model. Weights keep the Keras layouts: convolution
//! kernels as `[kh, kw, in, out]`, dense kernels as `[in, units]`, both
//! flattened in row-major order. Tensors flow through the stack as NHWC with
//! the batch axis dropped, so `flatten` matches Keras' channels-last order.

use super::Classifier;
use crate::error::{ModelLoadError, PipelineError};
use ndarray::{Array1, Array2, Array3, ArrayView4, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};
use shared::ModelBackend;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    /// `[height, width, channels]` of a single image.
    pub input_shape: [usize; 3],
    pub num_classes: usize,
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d {
        filters: usize,
        kernel_size: [usize; 2],
        #[serde(default)]
        padding: Padding,
        #[serde(default)]
        activation: Activation,
        kernel: Vec<f32>,
        bias: Vec<f32>,
    },
    MaxPool2d {
        pool_size: [usize; 2],
    },
    Flatten,
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
        kernel: Vec<f32>,
        bias: Vec<f32>,
    },
    /// Identity at inference time; kept so trainer exports load unchanged.
    Dropout {
        #[serde(default)]
        rate: f32,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    #[default]
    Valid,
    Same,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Softmax,
}

impl Activation {
    fn apply(self, mut values: ArrayViewMut1<'_, f32>) {
        match self {
            Activation::Linear => {}
            Activation::Relu => values.mapv_inplace(|v| v.max(0.0)),
            Activation::Softmax => {
                let max = values.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
                values.mapv_inplace(|v| (v - max).exp());
                let sum = values.sum();
                if sum > 0.0 {
                    values /= sum;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Spatial(usize, usize, usize),
    Flat(usize),
}

#[derive(Debug)]
enum Layer {
    Conv2d {
        /// `[kh * kw * in, out]`
        kernel: Array2<f32>,
        bias: Array1<f32>,
        kernel_size: (usize, usize),
        padding: Padding,
        activation: Activation,
    },
    MaxPool2d {
        pool_size: (usize, usize),
    },
    Flatten,
    Dense {
        kernel: Array2<f32>,
        bias: Array1<f32>,
        activation: Activation,
    },
}

enum Tensor {
    Spatial(Array3<f32>),
    Flat(Array1<f32>),
}

#[derive(Debug)]
pub struct SequentialCnn {
    input_shape: [usize; 3],
    num_classes: usize,
    layers: Vec<Layer>,
}

impl SequentialCnn {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ModelLoadError::NotFound(path.to_path_buf())
            } else {
                ModelLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let artifact: ModelArtifact = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ModelLoadError::Malformed(e.to_string()))?;
        Self::from_artifact(artifact)
    }

    /// Builds the layer stack, checking every weight block against the shape
    /// flowing into it.
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelLoadError> {
        if artifact.format_version != FORMAT_VERSION {
            return Err(ModelLoadError::Malformed(format!(
                "unsupported format_version {} (expected {})",
                artifact.format_version, FORMAT_VERSION
            )));
        }

        let [height, width, channels] = artifact.input_shape;
        if height == 0 || width == 0 || channels == 0 {
            return Err(ModelLoadError::Malformed(format!(
                "input_shape {:?} has an empty dimension",
                artifact.input_shape
            )));
        }

        let mut shape = Shape::Spatial(height, width, channels);
        let mut layers = Vec::with_capacity(artifact.layers.len());

        for (position, spec) in artifact.layers.into_iter().enumerate() {
            let incompatible =
                |reason: String| ModelLoadError::Incompatible(format!("layer {}: {}", position, reason));

            match spec {
                LayerSpec::Conv2d {
                    filters,
                    kernel_size: [kh, kw],
                    padding,
                    activation,
                    kernel,
                    bias,
                } => {
                    let Shape::Spatial(h, w, c) = shape else {
                        return Err(incompatible("conv2d after flatten".into()));
                    };
                    if kh == 0 || kw == 0 || filters == 0 {
                        return Err(incompatible("conv2d with an empty kernel".into()));
                    }
                    let rows = kh * kw * c;
                    if kernel.len() != rows * filters {
                        return Err(incompatible(format!(
                            "conv2d kernel has {} weights, expected {}x{}x{}x{}",
                            kernel.len(),
                            kh,
                            kw,
                            c,
                            filters
                        )));
                    }
                    if bias.len() != filters {
                        return Err(incompatible(format!(
                            "conv2d bias has {} values, expected {}",
                            bias.len(),
                            filters
                        )));
                    }
                    shape = match padding {
                        Padding::Same => Shape::Spatial(h, w, filters),
                        Padding::Valid if h >= kh && w >= kw => {
                            Shape::Spatial(h - kh + 1, w - kw + 1, filters)
                        }
                        Padding::Valid => {
                            return Err(incompatible(format!(
                                "{}x{} kernel does not fit a {}x{} input",
                                kh, kw, h, w
                            )));
                        }
                    };
                    let kernel = Array2::from_shape_vec((rows, filters), kernel)
                        .map_err(|e| incompatible(e.to_string()))?;
                    layers.push(Layer::Conv2d {
                        kernel,
                        bias: Array1::from(bias),
                        kernel_size: (kh, kw),
                        padding,
                        activation,
                    });
                }
                LayerSpec::MaxPool2d { pool_size: [ph, pw] } => {
                    let Shape::Spatial(h, w, c) = shape else {
                        return Err(incompatible("max_pool2d after flatten".into()));
                    };
                    if ph == 0 || pw == 0 || h < ph || w < pw {
                        return Err(incompatible(format!(
                            "{}x{} pool does not fit a {}x{} input",
                            ph, pw, h, w
                        )));
                    }
                    shape = Shape::Spatial(h / ph, w / pw, c);
                    layers.push(Layer::MaxPool2d { pool_size: (ph, pw) });
                }
                LayerSpec::Flatten => {
                    if let Shape::Spatial(h, w, c) = shape {
                        shape = Shape::Flat(h * w * c);
                    }
                    layers.push(Layer::Flatten);
                }
                LayerSpec::Dense {
                    units,
                    activation,
                    kernel,
                    bias,
                } => {
                    let Shape::Flat(inputs) = shape else {
                        return Err(incompatible("dense layer needs a flatten before it".into()));
                    };
                    if kernel.len() != inputs * units {
                        return Err(incompatible(format!(
                            "dense kernel has {} weights, expected {}x{}",
                            kernel.len(),
                            inputs,
                            units
                        )));
                    }
                    if bias.len() != units {
                        return Err(incompatible(format!(
                            "dense bias has {} values, expected {}",
                            bias.len(),
                            units
                        )));
                    }
                    let kernel = Array2::from_shape_vec((inputs, units), kernel)
                        .map_err(|e| incompatible(e.to_string()))?;
                    shape = Shape::Flat(units);
                    layers.push(Layer::Dense {
                        kernel,
                        bias: Array1::from(bias),
                        activation,
                    });
                }
                LayerSpec::Dropout { .. } => {}
            }
            log::debug!("layer {} -> {:?}", position, shape);
        }

        if shape != Shape::Flat(artifact.num_classes) {
            return Err(ModelLoadError::Incompatible(format!(
                "network output {:?} does not match num_classes {}",
                shape, artifact.num_classes
            )));
        }

        Ok(Self {
            input_shape: artifact.input_shape,
            num_classes: artifact.num_classes,
            layers,
        })
    }

    fn forward(&self, image: Array3<f32>) -> Result<Array1<f32>, PipelineError> {
        let mut tensor = Tensor::Spatial(image);

        for layer in &self.layers {
            tensor = match (layer, tensor) {
                (
                    Layer::Conv2d {
                        kernel,
                        bias,
                        kernel_size,
                        padding,
                        activation,
                    },
                    Tensor::Spatial(input),
                ) => Tensor::Spatial(conv2d(&input, kernel, bias, *kernel_size, *padding, *activation)?),
                (Layer::MaxPool2d { pool_size }, Tensor::Spatial(input)) => {
                    Tensor::Spatial(max_pool2d(&input, *pool_size))
                }
                (Layer::Flatten, Tensor::Spatial(input)) => Tensor::Flat(input.iter().copied().collect()),
                (Layer::Flatten, flat @ Tensor::Flat(_)) => flat,
                (
                    Layer::Dense {
                        kernel,
                        bias,
                        activation,
                    },
                    Tensor::Flat(input),
                ) => {
                    let mut output = input.dot(kernel) + bias;
                    activation.apply(output.view_mut());
                    Tensor::Flat(output)
                }
                _ => {
                    return Err(PipelineError::Inference(
                        "layer received a tensor of the wrong rank".into(),
                    ));
                }
            };
        }

        match tensor {
            Tensor::Flat(output) => Ok(output),
            Tensor::Spatial(_) => Err(PipelineError::Inference(
                "network ended on a spatial tensor".into(),
            )),
        }
    }
}

impl Classifier for SequentialCnn {
    fn backend(&self) -> ModelBackend {
        ModelBackend::Native
    }

    fn input_shape(&self) -> [usize; 4] {
        let [h, w, c] = self.input_shape;
        [1, h, w, c]
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, PipelineError> {
        let expected = self.input_shape();
        if input.shape() != expected {
            return Err(PipelineError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: input.shape().to_vec(),
            });
        }
        let image = input.index_axis(Axis(0), 0).to_owned();
        Ok(self.forward(image)?.to_vec())
    }
}

fn conv2d(
    input: &Array3<f32>,
    kernel: &Array2<f32>,
    bias: &Array1<f32>,
    (kh, kw): (usize, usize),
    padding: Padding,
    activation: Activation,
) -> Result<Array3<f32>, PipelineError> {
    let (h, w, c) = input.dim();
    let (pad_top, pad_left, out_h, out_w) = match padding {
        Padding::Same => ((kh - 1) / 2, (kw - 1) / 2, h, w),
        Padding::Valid => (0, 0, h + 1 - kh, w + 1 - kw),
    };

    // im2col: one row per output pixel, ordered (ky, kx, channel) to line up
    // with the kernel rows.
    let mut columns = Array2::<f32>::zeros((out_h * out_w, kh * kw * c));
    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut row = columns.row_mut(oy * out_w + ox);
            for ky in 0..kh {
                let Some(iy) = (oy + ky).checked_sub(pad_top).filter(|&y| y < h) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(ix) = (ox + kx).checked_sub(pad_left).filter(|&x| x < w) else {
                        continue;
                    };
                    let offset = (ky * kw + kx) * c;
                    for ch in 0..c {
                        row[offset + ch] = input[[iy, ix, ch]];
                    }
                }
            }
        }
    }

    let mut output = columns.dot(kernel);
    output += bias;
    for row in output.rows_mut() {
        activation.apply(row);
    }

    let filters = kernel.ncols();
    output
        .into_shape_with_order((out_h, out_w, filters))
        .map_err(|e| PipelineError::Inference(format!("conv2d reshape failed: {}", e)))
}

fn max_pool2d(input: &Array3<f32>, (ph, pw): (usize, usize)) -> Array3<f32> {
    let (h, w, c) = input.dim();
    Array3::from_shape_fn((h / ph, w / pw, c), |(y, x, ch)| {
        let mut max = f32::NEG_INFINITY;
        for dy in 0..ph {
            for dx in 0..pw {
                max = max.max(input[[y * ph + dy, x * pw + dx, ch]]);
            }
        }
        max
    })
}
