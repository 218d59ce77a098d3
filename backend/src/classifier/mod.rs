pub mod native;
#[cfg(feature = "torch")]
pub mod torch;

use crate::config::ModelConfig;
use crate::error::{ModelLoadError, PipelineError};
use ndarray::ArrayView4;
use shared::ModelBackend;
use std::sync::Arc;

/// A trained network mapping a normalized `[1, h, w, 3]` tensor to class
/// probabilities. Implementations never change between calls.
pub trait Classifier: Send + Sync {
    fn backend(&self) -> ModelBackend;

    fn input_shape(&self) -> [usize; 4];

    fn num_classes(&self) -> usize;

    fn predict(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, PipelineError>;
}

pub fn load_classifier(config: &ModelConfig) -> Result<Arc<dyn Classifier>, ModelLoadError> {
    let expected_input = [1, config.input_size, config.input_size, 3];

    let classifier: Arc<dyn Classifier> = match config.backend {
        ModelBackend::Native => Arc::new(native::SequentialCnn::load(&config.path)?),
        #[cfg(feature = "torch")]
        ModelBackend::Torch => Arc::new(torch::TorchClassifier::load(config)?),
        #[cfg(not(feature = "torch"))]
        ModelBackend::Torch => {
            return Err(ModelLoadError::Unsupported(
                "this build was compiled without the `torch` feature".into(),
            ));
        }
    };

    if classifier.input_shape() != expected_input {
        return Err(ModelLoadError::Incompatible(format!(
            "model input {:?} does not match configured input {:?}",
            classifier.input_shape(),
            expected_input
        )));
    }
    if classifier.num_classes() != config.num_classes {
        return Err(ModelLoadError::Incompatible(format!(
            "model produces {} classes, configured for {}",
            classifier.num_classes(),
            config.num_classes
        )));
    }

    log::info!(
        "Loaded {} model from {} (input {:?}, {} classes)",
        classifier.backend(),
        config.path.display(),
        classifier.input_shape(),
        classifier.num_classes()
    );
    Ok(classifier)
}

/// Turns raw network output into probabilities. Outputs from a model that
/// already ends in softmax pass through untouched when `apply_softmax` is off.
pub fn output_probabilities(mut output: Vec<f32>, apply_softmax: bool) -> Vec<f32> {
    if apply_softmax {
        let max = output.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        output.iter_mut().for_each(|v| *v = (*v - max).exp());
        let sum: f32 = output.iter().sum();
        if sum > 0.0 {
            output.iter_mut().for_each(|v| *v /= sum);
        }
    }
    output
}

/// Index and value of the highest probability. Ties go to the lowest index and
/// NaN never wins.
pub fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &p) in probabilities.iter().enumerate() {
        if p.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if p <= current => {}
            _ => best = Some((index, p)),
        }
    }
    best
}
