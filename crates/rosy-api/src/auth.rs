use axum::{Extension, Json, extract::State};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::error;

use rosy_types::api::{
    Claims, ProfileResponse, SendCodeRequest, SendCodeResponse, VerifyCodeRequest,
    VerifyCodeResponse,
};
use rosy_types::models::User;

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::state::AppState;

/// How long a session token stays valid.
const SESSION_DAYS: i64 = 30;

pub async fn send_code(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendCodeRequest>,
) -> Result<Json<SendCodeResponse>, ApiError> {
    state.codes.send_code(&req.email).await?;
    Ok(Json(SendCodeResponse {
        ok: true,
        message: "Code sent".into(),
    }))
}

/// Consumes a correct code, then loads or creates the profile and hands out
/// a session token.
pub async fn verify_code(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyCodeRequest>,
) -> Result<Json<VerifyCodeResponse>, ApiError> {
    let email = state.codes.verify_code(&req.email, &req.code).await?;

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || db.login_user(&email))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })??;

    let token = create_token(&state.jwt_secret, &user).map_err(|e| {
        error!("Failed to sign session token: {}", e);
        ApiError::Internal
    })?;

    Ok(Json(VerifyCodeResponse {
        ok: true,
        user,
        token,
    }))
}

/// GET /me
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let db = state.db.clone();
    let email = claims.sub;
    let profile = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let Some(user) = db.get_user(&email)? else {
            return Ok(None);
        };
        let rewards = db.list_rewards(&email)?;
        Ok(Some(ProfileResponse::for_user(user, rewards)))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    })??
    .ok_or(ApiError::Unauthorized)?;

    Ok(Json(profile))
}

pub fn create_token(secret: &str, user: &User) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.email.clone(),
        name: user.name.clone(),
        exp: (chrono::Utc::now() + chrono::Duration::days(SESSION_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
