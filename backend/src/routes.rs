use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{HttpResponse, web};
use chrono::{SecondsFormat, Utc};
use shared::{BloodGroup, HealthResponse, PredictionResponse};
use std::time::Instant;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::inference::preprocess::INPUT_SHAPE;
use crate::inference::quality::round2;
use crate::inference::{self, Classifier, InferenceError};
use crate::upload::{StoredUpload, read_upload};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/health").route(web::get().to(health)));
}

pub fn build_cors(config: &ServerConfig) -> Cors {
    Cors::default()
        .allowed_origin(&config.allowed_origin)
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
        .max_age(3600)
}

async fn predict(
    classifier: web::Data<dyn Classifier>,
    config: web::Data<ServerConfig>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let started = Instant::now();

    let upload = read_upload(payload, config.max_upload_bytes)
        .await
        .inspect_err(|e| log::warn!("Rejected upload: {:?}", e))?;
    log::debug!(
        "Received {} ({} bytes)",
        upload.original_name,
        upload.bytes.len()
    );

    let upload_dir = config.upload_dir.clone();
    let (analysis, filename) = web::block(move || -> Result<_, InferenceError> {
        // Dropping `stored` at the end of this closure removes the file.
        let stored = StoredUpload::write(&upload_dir, &upload.original_name, &upload.bytes)?;
        let analysis = inference::analyze(classifier.get_ref(), stored.path())?;
        Ok((analysis, stored.file_name().to_string()))
    })
    .await
    .map_err(|e| {
        log::error!("Prediction worker failed: {}", e);
        ApiError::Internal(e.to_string())
    })?
    .map_err(|e| {
        log::error!("Prediction failed: {}", e);
        ApiError::Processing(e)
    })?;

    let prediction = analysis.prediction;
    log::info!(
        "Predicted {} (class {}) with confidence {:.4}, quality {:.2}",
        prediction.label,
        prediction.class_index,
        prediction.confidence,
        analysis.quality_score
    );

    let response = PredictionResponse {
        predicted_class: prediction.class_index,
        predicted_label: prediction.label,
        confidence: prediction.confidence,
        confidence_percentage: round2(f64::from(prediction.confidence) * 100.0),
        processing_time: round2(started.elapsed().as_secs_f64() * 1000.0),
        image_quality_score: analysis.quality_score,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        filename,
    };

    Ok(HttpResponse::Ok().json(response))
}

async fn health(config: web::Data<ServerConfig>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        model_path: config.model_path.display().to_string(),
        class_labels: BloodGroup::labels(),
        input_shape: INPUT_SHAPE,
    })
}
