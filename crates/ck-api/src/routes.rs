use std::any::Any;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tracing::error;

use ck_types::api::ErrorBody;

use crate::auth::{self, AppState};
use crate::middleware::resolve_session;
use crate::{admin, files, posts, presence};

/// The full HTTP surface. CORS and request tracing are added by the binary.
pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(state.storage.dir());

    Router::new()
        .route("/health", get(health))
        // Auth
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .route("/api/logout", post(auth::logout))
        .route("/api/me", get(auth::me))
        .route("/api/account", delete(auth::delete_account))
        // Presence
        .route("/api/presence/ping", post(presence::ping))
        .route("/api/presence/leave", post(presence::leave))
        .route("/api/online-users", get(presence::list_online))
        // Admin
        .route("/api/admin/users", get(admin::list_users))
        .route("/api/admin/users/{username}/status", put(admin::set_status))
        .route("/api/admin/users/{username}/roles", post(admin::grant_role))
        .route(
            "/api/admin/users/{username}/roles/{role}",
            delete(admin::revoke_role),
        )
        // Posts & uploads
        .route("/api/posts", get(posts::list_posts).post(posts::create_post))
        .route("/api/posts/{id}", delete(posts::delete_post))
        .route(
            "/api/uploads",
            post(files::upload).layer(DefaultBodyLimit::max(files::MAX_UPLOAD_SIZE)),
        )
        .nest_service("/uploads", uploads)
        .layer(middleware::from_fn_with_state(state.clone(), resolve_session))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("handler panicked: {}", detail);

    let body = ErrorBody {
        success: false,
        code: "internal".into(),
        message: "internal server error".into(),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
