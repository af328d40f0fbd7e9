use actix_web::{HttpResponse, Result};
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

/// Health check endpoint
///
/// # Errors
/// Never fails
pub async fn ping() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        message: "Talentgate login gateway is running",
    }))
}
