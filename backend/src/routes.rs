use crate::error::NO_IMAGE_DATA;
use crate::pipeline::InferencePipeline;
use actix_files::Files;
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::http::StatusCode;
use actix_web::{Error, HttpRequest, HttpResponse, web};
use log::{error, info, warn};
use shared::{ErrorResponse, HealthResponse, LabelsReloaded, PredictRequest, PredictResponse};
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

pub fn configure_routes(cfg: &mut web::ServiceConfig, frontend_dir: Option<PathBuf>) {
    cfg.service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/api/predict").route(web::post().to(predict)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/admin/labels/reload").route(web::post().to(reload_labels)));

    if let Some(dir) = frontend_dir {
        cfg.service(Files::new("/", dir).index_file("index.html"));
    }
}

/// JSON extractor settings shared by every route: body size cap and
/// `{"error": ...}` bodies for rejected payloads.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(json_error_handler)
}

fn json_error_handler(err: JsonPayloadError, req: &HttpRequest) -> Error {
    let (status, message) = match &err {
        JsonPayloadError::OverflowKnownLength { .. } | JsonPayloadError::Overflow { .. } => {
            (StatusCode::PAYLOAD_TOO_LARGE, format!("Image payload too large: {}", err))
        }
        // Only an empty body fails at 1:0; a body cut short elsewhere is malformed.
        JsonPayloadError::Deserialize(e) if e.is_eof() && e.line() == 1 && e.column() == 0 => {
            (StatusCode::BAD_REQUEST, NO_IMAGE_DATA.to_string())
        }
        _ => (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", err)),
    };
    warn!("Rejected body on {}: {}", req.path(), err);

    let response = HttpResponse::build(status).json(ErrorResponse { error: message });
    InternalError::from_response(err, response).into()
}

async fn predict(
    pipeline: web::Data<InferencePipeline>,
    body: web::Json<PredictRequest>,
) -> Result<HttpResponse, Error> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();
    let PredictRequest { image } = body.into_inner();

    let worker = pipeline.clone();
    let result = web::block(move || worker.predict(image.as_deref())).await?;

    match result {
        Ok(prediction) => {
            info!(
                "[{}] class {} ({:.1}%) -> {} in {:?}",
                request_id,
                prediction.class_index,
                prediction.confidence * 100.0,
                prediction.disease,
                started.elapsed()
            );
            Ok(HttpResponse::Ok().json(PredictResponse::from(prediction)))
        }
        Err(e) => {
            if e.is_client_error() {
                warn!("[{}] rejected: {}", request_id, e);
            } else {
                error!("[{}] prediction failed: {}", request_id, e);
            }
            Err(e.into())
        }
    }
}

async fn health(pipeline: web::Data<InferencePipeline>) -> HttpResponse {
    let classifier = pipeline.classifier();
    let labels = pipeline.labels().snapshot();

    HttpResponse::Ok().json(HealthResponse {
        status: "ok".into(),
        backend: classifier.backend(),
        input_size: classifier.input_shape()[1],
        num_classes: classifier.num_classes(),
        labels: labels.len(),
        labels_loaded_at: labels.loaded_at().to_rfc3339(),
    })
}

async fn reload_labels(pipeline: web::Data<InferencePipeline>) -> Result<HttpResponse, Error> {
    let worker = pipeline.clone();
    let reloaded = web::block(move || worker.labels().reload()).await?;

    match reloaded {
        Ok(labels) => Ok(HttpResponse::Ok().json(LabelsReloaded {
            labels: labels.len(),
            loaded_at: labels.loaded_at().to_rfc3339(),
        })),
        Err(e) => {
            error!("Label reload failed, keeping previous labels: {}", e);
            Err(e.into())
        }
    }
}
