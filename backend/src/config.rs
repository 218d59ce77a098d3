use crate::error::ConfigError;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use shared::ModelBackend;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "config/service.yaml";

/// Largest accepted square input side.
pub const MAX_INPUT_SIZE: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub preprocessing: PreprocessingConfig,
    pub labels: LabelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub max_payload_bytes: usize,
    pub frontend_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: ModelBackend,
    pub path: PathBuf,
    pub input_size: usize,
    pub num_classes: usize,
    /// Only read by the torch backend: `cpu`, `cuda` or `auto`.
    pub device: String,
    /// Permute NHWC input to NCHW before handing it to the torch module.
    pub channels_first: bool,
    /// Softmax the torch module output. Turn off for exports that already
    /// end in a softmax layer.
    pub apply_softmax: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub resize_filter: ResizeFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    #[default]
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Gaussian => FilterType::Gaussian,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            workers: None,
            max_payload_bytes: 10 * 1024 * 1024,
            frontend_dir: PathBuf::from("frontend/dist"),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::Native,
            path: PathBuf::from("model/tomato_classifier.json"),
            input_size: 128,
            num_classes: 10,
            device: "cpu".to_string(),
            channels_first: false,
            apply_softmax: true,
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            resize_filter: ResizeFilter::CatmullRom,
        }
    }
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("class_labels.json"),
        }
    }
}

impl ServiceConfig {
    /// Reads `CONFIG_PATH` (or the default path), falling back to built-in
    /// defaults when no file exists, then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path, |key| std::env::var(key).ok())
    }

    /// File at `path` if it exists, otherwise defaults; then `lookup`
    /// overrides and validation.
    pub fn load_from<F>(path: impl AsRef<Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let mut config = if path.exists() {
            log::info!("Loading config from {}", path.display());
            Self::from_file(path)?
        } else {
            log::info!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|e| ConfigError::Invalid {
                key: "PORT".into(),
                reason: format!("{}", e),
            })?;
        }
        if let Some(dir) = lookup("FRONTEND_DIR") {
            self.server.frontend_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(backend) = lookup("MODEL_BACKEND") {
            self.model.backend = ModelBackend::from_str(&backend).map_err(|_| ConfigError::Invalid {
                key: "MODEL_BACKEND".into(),
                reason: format!("unknown backend '{}'", backend),
            })?;
        }
        if let Some(path) = lookup("LABELS_PATH") {
            self.labels.path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.model.input_size == 0 {
            return Err(invalid("model.input_size", "must be greater than zero"));
        }
        if self.model.input_size > MAX_INPUT_SIZE {
            return Err(invalid(
                "model.input_size",
                &format!("must be at most {}", MAX_INPUT_SIZE),
            ));
        }
        if self.model.num_classes == 0 {
            return Err(invalid("model.num_classes", "must be greater than zero"));
        }
        if self.server.max_payload_bytes == 0 {
            return Err(invalid("server.max_payload_bytes", "must be greater than zero"));
        }
        if self.model.backend == ModelBackend::Torch && !cfg!(feature = "torch") {
            return Err(invalid(
                "model.backend",
                "torch backend requires building with `--features torch`",
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Shape of the tensor the classifier is fed: `[1, size, size, 3]`.
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.model.input_size, self.model.input_size, 3]
    }
}
