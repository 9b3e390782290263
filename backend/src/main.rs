mod config;
mod error;
mod inference;
mod routes;
mod upload;

use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use config::ServerConfig;
use inference::{Classifier, TorchClassifier};
use routes::{build_cors, configure_routes};
use std::env;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = ServerConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    log::info!("Configuration: {:?}", config);

    std::fs::create_dir_all(&config.upload_dir)?;

    let classifier: Arc<dyn Classifier> =
        match TorchClassifier::load(&config.model_path, config.apply_softmax) {
            Ok(model) => Arc::new(model),
            Err(e) => {
                log::error!("Failed to load model at startup: {}", e);
                return Err(std::io::Error::other(format!("Model loading failed: {}", e)));
            }
        };

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);
    log::info!("Allowed origin: {}", config.allowed_origin);

    let config = web::Data::new(config);
    let classifier = web::Data::from(classifier);

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&config))
            .wrap(Logger::default())
            .app_data(classifier.clone())
            .app_data(config.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
