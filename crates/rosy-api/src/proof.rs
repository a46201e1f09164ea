use axum::{Extension, Json, extract::State};

use rosy_types::api::{Claims, SessionSnapshot, UploadProofResponse};
use rosy_types::models::POINTS_PER_DEPOSIT;

use crate::error::ApiError;
use crate::extract::ApiMultipart;
use crate::state::AppState;
use crate::upload::read_image;

/// POST /upload-proof
///
/// A rejected proof is still a 200 with `ok: false`; the session moves to
/// the rejected state and can be retried.
pub async fn upload_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiMultipart(multipart): ApiMultipart,
) -> Result<Json<UploadProofResponse>, ApiError> {
    let upload = read_image(multipart).await?;
    let receipt = state
        .flow
        .submit_proof(&claims.sub, &upload.filename, upload.bytes)
        .await?;

    let accepted = receipt.decision.accepted;
    Ok(Json(UploadProofResponse {
        ok: accepted,
        message: receipt.decision.message,
        points: accepted.then_some(POINTS_PER_DEPOSIT),
        user: receipt.user,
    }))
}

/// POST /proof/open
pub async fn open_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.flow.open_proof_upload(&claims.sub).await?))
}

/// POST /proof/retry
pub async fn retry_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.flow.retry_proof(&claims.sub).await?))
}

/// POST /proof/acknowledge
pub async fn acknowledge_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.flow.acknowledge(&claims.sub).await?))
}
