use axum::{Extension, Json, extract::State};

use rosy_classifier::ClassificationInput;
use rosy_types::api::{ChatRequest, ChatResponse, Claims, SessionSnapshot};
use rosy_types::models::ClassificationResult;

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiMultipart};
use crate::state::AppState;
use crate::upload::read_image;

/// POST /scan
pub async fn scan(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiMultipart(multipart): ApiMultipart,
) -> Result<Json<ClassificationResult>, ApiError> {
    let upload = read_image(multipart).await?;
    let input = ClassificationInput::Image {
        bytes: upload.bytes,
        filename: upload.filename,
    };
    let result = state.flow.scan(&claims.sub, input).await?;
    Ok(Json(result))
}

/// POST /chat
pub async fn chat(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::validation("Missing message"));
    }
    let reply = state.flow.chat(message).await;
    Ok(Json(ChatResponse { reply }))
}

/// POST /scan/reset
pub async fn reset_scan(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.flow.new_scan(&claims.sub).await?))
}

/// GET /session
pub async fn session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<SessionSnapshot> {
    Json(state.flow.snapshot(&claims.sub).await)
}
