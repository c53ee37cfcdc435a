pub mod config;
pub mod demo;
pub mod languages;

pub use config::*;
pub use demo::*;
pub use languages::*;

use crate::error::AppError;
use actix_web::HttpResponse;

/// Fallback for unmatched routes.
pub async fn not_found() -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound("Resource not found".to_string()))
}
