use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;
use thiserror::Error;

use crate::engine::EngineError;
use crate::types::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Model failed to load on startup.")]
    ModelUnavailable,

    #[error(transparent)]
    Generation(#[from] EngineError),

    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let body = Json(ErrorResponse {
            detail: self.to_string(),
        });
        // 所有失败都按 500 返回
        (Status::InternalServerError, body).respond_to(req)
    }
}
