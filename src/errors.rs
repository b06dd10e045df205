// src/errors.rs
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::SkipReason;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Image location not allowed: {0}")]
    PolicyGated(String),

    #[error("Rate limit reached for {action}: {threshold} events per {window_secs}s")]
    RateLimited {
        action: String,
        threshold: u32,
        window_secs: u64,
    },

    #[error("Unresolvable source: {0}")]
    UnresolvableSource(String),

    #[error("Remote fetch failed: {0}")]
    FetchFailed(String),

    #[error("Tracking pixel: {0}")]
    TrackingPixel(String),

    #[error("Unreadable or unsupported image: {0}")]
    UnreadableOrUnsupportedFormat(String),

    #[error("Derivative generation failed: {0}")]
    GenerationFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl FilterError {
    pub fn skip_reason(&self) -> SkipReason {
        match self {
            FilterError::PolicyGated(_) => SkipReason::PolicyGated,
            FilterError::RateLimited { .. } => SkipReason::RateLimited,
            FilterError::UnresolvableSource(_) => SkipReason::UnresolvableSource,
            FilterError::FetchFailed(_) => SkipReason::FetchFailed,
            FilterError::TrackingPixel(_) => SkipReason::TrackingPixel,
            FilterError::UnreadableOrUnsupportedFormat(_) => {
                SkipReason::UnreadableOrUnsupportedFormat
            }
            FilterError::GenerationFailed(_)
            | FilterError::Io(_)
            | FilterError::Redis(_)
            | FilterError::Config(_)
            | FilterError::Validation(_) => SkipReason::GenerationFailed,
        }
    }
}

impl From<redis::RedisError> for FilterError {
    fn from(e: redis::RedisError) -> Self {
        FilterError::Redis(e.to_string())
    }
}

impl ResponseError for FilterError {
    fn error_response(&self) -> HttpResponse {
        match self {
            FilterError::Validation(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Validation error",
                "message": self.to_string()
            })),
            FilterError::Config(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Configuration error",
                "message": self.to_string()
            })),
            _ => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Filter error",
                "message": self.to_string()
            })),
        }
    }
}
