use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use backend::classifier::load_classifier;
use backend::config::ServiceConfig;
use backend::labels::LabelStore;
use backend::pipeline::InferencePipeline;
use backend::preprocess::ImageDecoder;
use backend::routes::{configure_routes, json_config};
use std::env;
use std::sync::Arc;

fn startup_error(stage: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{} failed: {}", stage, err);
    std::io::Error::other(format!("{} failed: {}", stage, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = ServiceConfig::load().map_err(|e| startup_error("Config loading", e))?;

    // Both artifacts must be present before the server binds.
    let classifier = load_classifier(&config.model).map_err(|e| startup_error("Model loading", e))?;
    let labels = LabelStore::open(&config.labels.path).map_err(|e| startup_error("Label map loading", e))?;
    let snapshot = labels.snapshot();
    log::info!("Loaded {} labels from {}", snapshot.len(), config.labels.path.display());
    if snapshot.len() < classifier.num_classes() {
        log::warn!(
            "Label map covers {} of {} classes; the rest resolve to \"Unknown Disease\"",
            snapshot.len(),
            classifier.num_classes()
        );
    }

    let decoder = ImageDecoder::new(config.model.input_size, config.preprocessing.resize_filter.into());
    let pipeline = web::Data::new(InferencePipeline::new(decoder, classifier, Arc::new(labels)));

    let frontend_dir = if config.server.frontend_dir.is_dir() {
        log::info!("Serving web client from {}", config.server.frontend_dir.display());
        Some(config.server.frontend_dir.clone())
    } else {
        log::warn!(
            "Web client directory {} not found; serving the API only",
            config.server.frontend_dir.display()
        );
        None
    };

    let max_payload = config.server.max_payload_bytes;
    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(pipeline.clone())
            .app_data(json_config(max_payload))
            .configure(|cfg| configure_routes(cfg, frontend_dir.clone()))
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
