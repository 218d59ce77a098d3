use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;
use std::path::PathBuf;

pub const NO_IMAGE_DATA: &str = "No image data provided";

/// Failures of a single prediction request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    MalformedInput(String),
    #[error("Invalid base64 image payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("Unsupported or corrupt image: {0}")]
    ImageFormat(#[from] image::ImageError),
    #[error("Model expects input of shape {expected:?} but received {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl PipelineError {
    pub fn missing_image() -> Self {
        PipelineError::MalformedInput(NO_IMAGE_DATA.to_string())
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedInput(_) | PipelineError::Decode(_) | PipelineError::ImageFormat(_)
        )
    }
}

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Model artifact not found at {0}")]
    NotFound(PathBuf),
    #[error("Failed to read model artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed model artifact: {0}")]
    Malformed(String),
    #[error("Model shape mismatch: {0}")]
    Incompatible(String),
    #[error("Backend unavailable: {0}")]
    Unsupported(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LabelMapError {
    #[error("Label map not found at {0}")]
    NotFound(PathBuf),
    #[error("Failed to read label map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse label map: {0}")]
    Parse(String),
}

impl ResponseError for LabelMapError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn client_errors_map_to_bad_request() {
        assert_eq!(PipelineError::missing_image().status_code(), StatusCode::BAD_REQUEST);
        let shape = PipelineError::ShapeMismatch {
            expected: vec![1, 128, 128, 3],
            actual: vec![1, 64, 64, 3],
        };
        assert_eq!(shape.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            PipelineError::Inference("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn missing_image_body_matches_wire_shape() {
        let response = PipelineError::missing_image().error_response();
        let body = to_bytes(response.into_body()).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "No image data provided");
    }
}
