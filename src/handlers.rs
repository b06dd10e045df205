// src/handlers.rs
use crate::{errors::FilterError, pipeline::FilterPipeline};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use std::sync::Arc;

pub const MAX_DOCUMENT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<FilterPipeline>,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub text: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(MAX_DOCUMENT_BYTES + 1024))
        .service(web::scope("/api/v1").route("/filter", web::post().to(filter_document)))
        .route("/health", web::get().to(health_check));
}

pub async fn filter_document(
    body: web::Json<FilterRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, FilterError> {
    let request = body.into_inner();
    if request.text.len() > MAX_DOCUMENT_BYTES {
        return Err(FilterError::Validation(format!(
            "Document exceeds {} bytes",
            MAX_DOCUMENT_BYTES
        )));
    }

    let outcome = data.pipeline.process(&request.text).await;
    if !outcome.skips.is_empty() {
        log::info!(
            "Filtered document: {} generated, {} cache hits, {} skipped",
            outcome.generated,
            outcome.cache_hits,
            outcome.skips.len()
        );
    }

    Ok(HttpResponse::Ok().json(&outcome))
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "refit",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
