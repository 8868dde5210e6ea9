use axum::{Json, extract::State};

use ck_types::api::{OnlineUser, OnlineUsersResponse, SuccessResponse};

use crate::auth::{AppState, run_db};
use crate::error::ApiError;
use crate::middleware::SessionUser;

pub async fn ping(State(state): State<AppState>, user: SessionUser) -> Json<SuccessResponse> {
    state.presence.touch(&user.username).await;
    Json(SuccessResponse::ok())
}

/// Go offline without ending the session.
pub async fn leave(State(state): State<AppState>, user: SessionUser) -> Json<SuccessResponse> {
    state.presence.leave(&user.username).await;
    Json(SuccessResponse::ok())
}

/// GET /api/online-users: online names joined with their stored status.
/// Users deleted since their last ping are left out.
pub async fn list_online(
    State(state): State<AppState>,
) -> Result<Json<OnlineUsersResponse>, ApiError> {
    let online = state.presence.list_online().await;

    let users = run_db(&state, move |db| {
        let mut users = Vec::with_capacity(online.len());
        for username in online {
            if let Some(row) = db.get_user_by_username(&username)? {
                users.push(OnlineUser {
                    username: row.username,
                    status: row.status,
                });
            }
        }
        Ok(users)
    })
    .await?;

    Ok(Json(OnlineUsersResponse { users }))
}
