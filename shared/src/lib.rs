use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Body of `POST /predict`. `image` is a data URL (`data:image/png;base64,...`).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PredictRequest {
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictResponse {
    pub disease: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

/// Which runtime evaluates the trained network.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ModelBackend {
    #[default]
    Native,
    Torch,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub backend: ModelBackend,
    pub input_size: usize,
    pub num_classes: usize,
    pub labels: usize,
    pub labels_loaded_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LabelsReloaded {
    pub labels: usize,
    pub loaded_at: String,
}
