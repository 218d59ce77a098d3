use backend::classifier::native::{
    Activation, FORMAT_VERSION, LayerSpec, ModelArtifact, Padding, SequentialCnn,
};
use backend::classifier::{Classifier, load_classifier};
use backend::config::ModelConfig;
use backend::labels::{LabelMap, LabelStore};
use backend::pipeline::InferencePipeline;
use backend::preprocess::ImageDecoder;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;

const LABELS: &str = r#"{
    "0": "Tomato_Bacterial_spot",
    "1": "Tomato_Early_blight",
    "2": "Tomato_Late_blight",
    "3": "Tomato_Leaf_Mold",
    "4": "Tomato_Septoria_leaf_spot",
    "5": "Tomato_Spider_mites_Two_spotted_spider_mite",
    "6": "Tomato__Target_Spot",
    "7": "Tomato__Tomato_YellowLeaf__Curl_Virus",
    "8": "Tomato__Tomato_mosaic_virus",
    "9": "Tomato_healthy"
}"#;

fn pattern(len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|i| ((i % 13) as f32 - 6.0) * scale).collect()
}

fn conv(inputs: usize, filters: usize) -> LayerSpec {
    LayerSpec::Conv2d {
        filters,
        kernel_size: [3, 3],
        padding: Padding::Same,
        activation: Activation::Relu,
        kernel: pattern(3 * 3 * inputs * filters, 0.001),
        bias: vec![0.01; filters],
    }
}

/// The trainer's network: three conv/pool blocks on a 128x128x3 input,
/// flatten, dense(`hidden`, relu), dropout, dense(10, softmax). The output
/// bias favours `winner` so the expected class is known.
fn tomato_cnn(hidden: usize, winner: usize) -> ModelArtifact {
    let flattened = 16 * 16 * 128;
    let mut output_bias = vec![0.0; 10];
    output_bias[winner] = 50.0;

    ModelArtifact {
        format_version: FORMAT_VERSION,
        input_shape: [128, 128, 3],
        num_classes: 10,
        layers: vec![
            conv(3, 32),
            LayerSpec::MaxPool2d { pool_size: [2, 2] },
            conv(32, 64),
            LayerSpec::MaxPool2d { pool_size: [2, 2] },
            conv(64, 128),
            LayerSpec::MaxPool2d { pool_size: [2, 2] },
            LayerSpec::Flatten,
            LayerSpec::Dense {
                units: hidden,
                activation: Activation::Relu,
                kernel: pattern(flattened * hidden, 1e-5),
                bias: vec![0.0; hidden],
            },
            LayerSpec::Dropout { rate: 0.5 },
            LayerSpec::Dense {
                units: 10,
                activation: Activation::Softmax,
                kernel: pattern(hidden * 10, 1e-3),
                bias: output_bias,
            },
        ],
    }
}

fn leaf_data_url() -> String {
    let leaf = DynamicImage::ImageRgb8(RgbImage::from_fn(256, 192, |x, y| {
        Rgb([(x % 200) as u8, 140, (y % 256) as u8])
    }));
    let mut png = Cursor::new(Vec::new());
    leaf.write_to(&mut png, ImageFormat::Png).unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner()))
}

fn pipeline(classifier: Arc<dyn Classifier>) -> InferencePipeline {
    InferencePipeline::new(
        ImageDecoder::new(128, FilterType::CatmullRom),
        classifier,
        Arc::new(LabelStore::fixed(LabelMap::from_json(LABELS).unwrap())),
    )
}

#[test]
fn full_size_network_classifies_a_leaf() {
    let model = SequentialCnn::from_artifact(tomato_cnn(512, 9)).unwrap();
    assert_eq!(model.input_shape(), [1, 128, 128, 3]);
    assert_eq!(model.num_classes(), 10);

    let prediction = pipeline(Arc::new(model)).predict(Some(&leaf_data_url())).unwrap();
    assert_eq!(prediction.class_index, 9);
    assert_eq!(prediction.disease, "Tomato_healthy");
    assert!(prediction.confidence > 0.99);
}

#[test]
fn exported_artifact_loads_from_disk_with_default_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    serde_json::to_writer(&mut file, &tomato_cnn(8, 2)).unwrap();

    let config = ModelConfig {
        path: file.path().to_path_buf(),
        ..ModelConfig::default()
    };
    let classifier = load_classifier(&config).unwrap();

    let pipeline = pipeline(classifier);
    let first = pipeline.predict(Some(&leaf_data_url())).unwrap();
    let second = pipeline.predict(Some(&leaf_data_url())).unwrap();
    assert_eq!(first.disease, "Tomato_Late_blight");
    assert_eq!(first, second);
}
