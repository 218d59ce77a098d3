use super::{Classifier, output_probabilities};
use crate::config::ModelConfig;
use crate::error::{ModelLoadError, PipelineError};
use ndarray::ArrayView4;
use shared::ModelBackend;
use std::sync::Mutex;
use tch::{CModule, Device, Kind, Tensor};

/// A TorchScript export of the classifier. `CModule` is not `Sync`, so calls
/// are serialized behind a mutex; evaluation itself is stateless.
pub struct TorchClassifier {
    module: Mutex<CModule>,
    device: Device,
    input_shape: [usize; 4],
    num_classes: usize,
    channels_first: bool,
    apply_softmax: bool,
}

impl TorchClassifier {
    pub fn load(config: &ModelConfig) -> Result<Self, ModelLoadError> {
        if !config.path.exists() {
            return Err(ModelLoadError::NotFound(config.path.clone()));
        }

        let device = match config.device.as_str() {
            "cpu" => Device::Cpu,
            "cuda" => Device::Cuda(0),
            "auto" => Device::cuda_if_available(),
            other => {
                return Err(ModelLoadError::Unsupported(format!("unknown device '{}'", other)));
            }
        };

        let mut module = CModule::load_on_device(&config.path, device)
            .map_err(|e| ModelLoadError::Malformed(e.to_string()))?;
        module.set_eval();

        let input_shape = [1, config.input_size, config.input_size, 3];
        let mut classifier = Self {
            module: Mutex::new(module),
            device,
            input_shape,
            num_classes: config.num_classes,
            channels_first: config.channels_first,
            apply_softmax: config.apply_softmax,
        };

        // Dry run to learn the real output width before serving.
        let probe = ndarray::Array4::<f32>::zeros(input_shape);
        let output = classifier
            .run(probe.view())
            .map_err(|e| ModelLoadError::Incompatible(e.to_string()))?;
        classifier.num_classes = output.len();

        Ok(classifier)
    }

    fn run(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, PipelineError> {
        let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let values: Vec<f32> = input.iter().copied().collect();

        let mut tensor = Tensor::from_slice(&values).view(dims.as_slice()).to_device(self.device);
        if self.channels_first {
            tensor = tensor.permute([0, 3, 1, 2]);
        }

        let module = self
            .module
            .lock()
            .map_err(|_| PipelineError::Inference("torch module lock poisoned".into()))?;
        let output = tch::no_grad(|| module.forward_ts(&[tensor]))
            .map_err(|e| PipelineError::Inference(e.to_string()))?;
        drop(module);

        let output_flat = output.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_probabilities(output_vec, self.apply_softmax))
    }
}

impl Classifier for TorchClassifier {
    fn backend(&self) -> ModelBackend {
        ModelBackend::Torch
    }

    fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, PipelineError> {
        if input.shape() != self.input_shape {
            return Err(PipelineError::ShapeMismatch {
                expected: self.input_shape.to_vec(),
                actual: input.shape().to_vec(),
            });
        }
        self.run(input)
    }
}
