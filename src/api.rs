use rocket::serde::json::Json;
use rocket::{catch, get, post, Request, State};

use crate::app_state::{AppState, ModelHandle};
use crate::engine::GenerateParams;
use crate::error::ApiError;
use crate::invoker;
use crate::prompt;
use crate::types::{ErrorResponse, GenerateRequest, GenerateResponse, HealthResponse};

#[get("/")]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Backend is running".to_string(),
    })
}

#[post("/generate", data = "<req>")]
pub async fn generate(
    state: &State<AppState>,
    req: Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    // 模型没加载成功就直接报错，不去调引擎
    let engine = match &state.model {
        ModelHandle::Loaded { engine, .. } => engine.clone(),
        ModelHandle::Failed { reason, .. } => {
            log::error!("generate called without a model: {reason}");
            return Err(ApiError::ModelUnavailable);
        }
    };

    let req = req.into_inner();
    if req.num_images > 1 {
        log::debug!("numImages = {} requested, only one image is returned", req.num_images);
    }

    let resolved = prompt::resolve(&req);
    let params = GenerateParams {
        prompt: resolved.full_prompt,
        negative_prompt: req.negative_prompt,
        num_inference_steps: req.num_inference_steps,
        guidance_scale: req.guidance_scale,
        width: resolved.width,
        height: resolved.height,
    };

    let result = invoker::generate_with_fallback(engine.as_ref(), &params)
        .await
        .map_err(ApiError::from)
        .and_then(|img| invoker::encode_data_url(&img).map_err(ApiError::from));

    match result {
        Ok(image_url) => Ok(Json(GenerateResponse { image_url })),
        Err(e) => {
            log::error!("generation error: {e}");
            Err(e)
        }
    }
}

#[catch(400)]
pub fn bad_request(_req: &Request<'_>) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        detail: "Bad Request".to_string(),
    })
}

#[catch(404)]
pub fn not_found(_req: &Request<'_>) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        detail: "Not Found".to_string(),
    })
}

#[catch(422)]
pub fn unprocessable(_req: &Request<'_>) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        detail: "Request body is not a valid generation request".to_string(),
    })
}

#[catch(500)]
pub fn internal_error(_req: &Request<'_>) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        detail: "Internal Server Error".to_string(),
    })
}
