use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::upload::MAX_IMAGE_BYTES;
use crate::{auth, proof, scan};

/// Full HTTP surface. Every route is served both at the root and under `/api`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/send-code", post(auth::send_code))
        .route("/verify-code", post(auth::verify_code))
        .route("/chat", post(scan::chat));

    let protected_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/session", get(scan::session))
        .route("/scan", post(scan::scan))
        .route("/scan/reset", post(scan::reset_scan))
        .route("/upload-proof", post(proof::upload_proof))
        .route("/proof/open", post(proof::open_proof))
        .route("/proof/retry", post(proof::retry_proof))
        .route("/proof/acknowledge", post(proof::acknowledge_proof))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let routes: Router<AppState> = Router::new().merge(public_routes).merge(protected_routes);

    Router::new()
        .nest("/api", routes.clone())
        .merge(routes)
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}
