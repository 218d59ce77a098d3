use crate::classifier::{Classifier, argmax};
use crate::error::PipelineError;
use crate::labels::LabelStore;
use crate::preprocess::ImageDecoder;
use shared::PredictResponse;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub confidence: f32,
    pub disease: String,
}

impl From<Prediction> for PredictResponse {
    fn from(prediction: Prediction) -> Self {
        PredictResponse {
            disease: prediction.disease,
        }
    }
}

/// Decode, classify, pick the top class and name it. Holds only read-only
/// handles, so one instance is shared by every request.
#[derive(Clone)]
pub struct InferencePipeline {
    decoder: ImageDecoder,
    classifier: Arc<dyn Classifier>,
    labels: Arc<LabelStore>,
}

impl InferencePipeline {
    pub fn new(decoder: ImageDecoder, classifier: Arc<dyn Classifier>, labels: Arc<LabelStore>) -> Self {
        Self {
            decoder,
            classifier,
            labels,
        }
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn labels(&self) -> &LabelStore {
        &self.labels
    }

    pub fn predict(&self, image: Option<&str>) -> Result<Prediction, PipelineError> {
        let image = image.ok_or_else(PipelineError::missing_image)?;
        let tensor = self.decoder.decode(image)?;

        let expected = self.classifier.input_shape();
        if tensor.shape() != expected {
            return Err(PipelineError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: tensor.shape().to_vec(),
            });
        }

        let probabilities = self.classifier.predict(tensor.view())?;
        self.select(&probabilities)
    }

    /// Maps a probability vector to the labeled top class.
    pub fn select(&self, probabilities: &[f32]) -> Result<Prediction, PipelineError> {
        let (class_index, confidence) = argmax(probabilities).ok_or_else(|| {
            PipelineError::Inference(format!(
                "model returned no comparable probabilities ({} values)",
                probabilities.len()
            ))
        })?;

        let labels = self.labels.snapshot();
        Ok(Prediction {
            class_index,
            confidence,
            disease: labels.resolve(class_index).to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use ndarray::ArrayView4;
    use shared::ModelBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed probability vector and counts calls.
    pub struct FixedClassifier {
        pub probabilities: Vec<f32>,
        pub input_shape: [usize; 4],
        pub calls: AtomicUsize,
    }

    impl FixedClassifier {
        pub fn new(probabilities: Vec<f32>) -> Self {
            Self {
                probabilities,
                input_shape: [1, 128, 128, 3],
                calls: AtomicUsize::new(0),
            }
        }

        /// Peaks at `index` among `num_classes` classes.
        pub fn peaked(index: usize, num_classes: usize) -> Self {
            let mut probabilities = vec![0.02; num_classes];
            probabilities[index] = 1.0 - 0.02 * (num_classes - 1) as f32;
            Self::new(probabilities)
        }
    }

    impl Classifier for FixedClassifier {
        fn backend(&self) -> ModelBackend {
            ModelBackend::Native
        }

        fn input_shape(&self) -> [usize; 4] {
            self.input_shape
        }

        fn num_classes(&self) -> usize {
            self.probabilities.len()
        }

        fn predict(&self, _input: ArrayView4<'_, f32>) -> Result<Vec<f32>, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.probabilities.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::FixedClassifier;
    use super::*;
    use crate::labels::LabelMap;
    use crate::preprocess::fixtures::png_data_url;
    use image::imageops::FilterType;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::atomic::Ordering;

    fn pipeline_with(classifier: FixedClassifier, labels: &str) -> (InferencePipeline, Arc<FixedClassifier>) {
        let classifier = Arc::new(classifier);
        let labels = LabelStore::fixed(LabelMap::from_json(labels).unwrap());
        let pipeline = InferencePipeline::new(
            ImageDecoder::new(128, FilterType::CatmullRom),
            classifier.clone(),
            Arc::new(labels),
        );
        (pipeline, classifier)
    }

    fn leaf_url() -> String {
        png_data_url(&DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([40, 160, 60]))))
    }

    #[test]
    fn healthy_sample_resolves_to_its_label() {
        let (pipeline, classifier) =
            pipeline_with(FixedClassifier::peaked(3, 10), r#"{"3": "Tomato_Healthy"}"#);

        let prediction = pipeline.predict(Some(&leaf_url())).unwrap();
        assert_eq!(prediction.class_index, 3);
        assert_eq!(prediction.disease, "Tomato_Healthy");
        assert_eq!(PredictResponse::from(prediction).disease, "Tomato_Healthy");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ties_resolve_to_the_lowest_index() {
        let mut probabilities = vec![0.0; 10];
        probabilities[0] = 0.1;
        probabilities[1] = 0.45;
        probabilities[2] = 0.45;
        let (pipeline, _) = pipeline_with(
            FixedClassifier::new(probabilities),
            r#"{"1": "Tomato_Early_blight", "2": "Tomato_Late_blight"}"#,
        );

        let prediction = pipeline.predict(Some(&leaf_url())).unwrap();
        assert_eq!(prediction.class_index, 1);
        assert_eq!(prediction.disease, "Tomato_Early_blight");
    }

    #[test]
    fn unmapped_class_is_unknown_disease() {
        let (pipeline, _) = pipeline_with(FixedClassifier::peaked(7, 10), r#"{"3": "Tomato_Healthy"}"#);
        let prediction = pipeline.predict(Some(&leaf_url())).unwrap();
        assert_eq!(prediction.disease, "Unknown Disease");
    }

    #[test]
    fn missing_image_never_reaches_the_model() {
        let (pipeline, classifier) = pipeline_with(FixedClassifier::peaked(0, 10), "{}");
        let err = pipeline.predict(None).unwrap_err();
        assert_eq!(err.to_string(), "No image data provided");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bad_base64_is_not_silently_predicted() {
        let (pipeline, classifier) = pipeline_with(FixedClassifier::peaked(0, 10), r#"{"0": "x"}"#);
        let err = pipeline.predict(Some("data:image/png;base64,%%%")).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn decoder_and_model_skew_is_a_shape_mismatch() {
        let mut classifier = FixedClassifier::peaked(0, 10);
        classifier.input_shape = [1, 224, 224, 3];
        let (pipeline, classifier) = pipeline_with(classifier, "{}");

        let err = pipeline.predict(Some(&leaf_url())).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
        assert!(!err.is_client_error());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_probabilities_are_an_inference_error() {
        let (pipeline, _) = pipeline_with(FixedClassifier::new(vec![]), "{}");
        let err = pipeline.select(&[]).unwrap_err();
        assert!(matches!(err, PipelineError::Inference(_)));
    }
}
