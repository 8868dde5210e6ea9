use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use ck_db::queries::update_status;
use ck_db::UserDirectory;
use ck_types::api::{AdminUser, GrantRoleRequest, SetStatusRequest, SuccessResponse};
use ck_types::models::{is_singleton_status, normalize_status};

use crate::auth::{AppState, run_db};
use crate::authz::{ADMINS, require_capability, visible_roles};
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::SessionUser;
use crate::registration::Rejection;

const MAX_ROLE_CHARS: usize = 32;

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    user: SessionUser,
) -> Result<Json<Vec<AdminUser>>, ApiError> {
    require_capability(&state, &user, ADMINS).await?;

    let (rows, mut roles_by_id) = run_db(&state, |db| Ok((db.list_users()?, db.roles_by_user()?))).await?;

    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        let explicit = roles_by_id.remove(&row.id).unwrap_or_default();
        let (roles, is_super_admin) = visible_roles(&explicit);
        let seen_this_session = state.presence.is_known(&row.username).await;
        users.push(AdminUser {
            id: row.id,
            username: row.username,
            status: row.status,
            roles,
            is_super_admin,
            seen_this_session,
        });
    }

    Ok(Json(users))
}

/// PUT /api/admin/users/{username}/status
pub async fn set_status(
    State(state): State<AppState>,
    user: SessionUser,
    Path(username): Path<String>,
    body: Result<ValidJson<SetStatusRequest>, ApiError>,
) -> Result<Json<SuccessResponse>, ApiError> {
    require_capability(&state, &user, ADMINS).await?;
    let ValidJson(req) = body?;

    let status = normalize_status(req.status.as_deref())
        .map_err(|s| ApiError::Validation(format!("unknown status '{}'", s)))?;

    let target = username.clone();
    let new_status = status.clone();
    let updated = run_db(&state, move |db| {
        db.with_tx(|conn| {
            if let Some(status) = new_status.as_deref() {
                if is_singleton_status(status) {
                    let holder = conn.status_holder(status)?;
                    if holder.is_some_and(|h| h != target) {
                        return Err(Rejection::StatusTaken.into());
                    }
                }
            }
            Ok(update_status(conn, &target, new_status.as_deref())?)
        })
    })
    .await?;

    if !updated {
        return Err(ApiError::NotFound);
    }

    info!(
        "{} set status of {} to {}",
        user.username,
        username,
        status.as_deref().unwrap_or("(none)")
    );
    Ok(Json(SuccessResponse::ok()))
}

/// POST /api/admin/users/{username}/roles
pub async fn grant_role(
    State(state): State<AppState>,
    user: SessionUser,
    Path(username): Path<String>,
    body: Result<ValidJson<GrantRoleRequest>, ApiError>,
) -> Result<Json<SuccessResponse>, ApiError> {
    require_capability(&state, &user, ADMINS).await?;
    let ValidJson(req) = body?;

    let role = req.role.trim().to_string();
    if role.is_empty() || role.chars().count() > MAX_ROLE_CHARS {
        return Err(ApiError::Validation(format!(
            "role must be 1-{} characters",
            MAX_ROLE_CHARS
        )));
    }

    let target = username.clone();
    let granted_role = role.clone();
    let inserted = run_db(&state, move |db| {
        let row = db.get_user_by_username(&target)?.ok_or(ApiError::NotFound)?;
        Ok(db.grant_role(row.id, &granted_role)?)
    })
    .await?;

    if inserted {
        info!("{} granted {} to {}", user.username, role, username);
    }
    Ok(Json(SuccessResponse::ok()))
}

/// DELETE /api/admin/users/{username}/roles/{role}
pub async fn revoke_role(
    State(state): State<AppState>,
    user: SessionUser,
    Path((username, role)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, ApiError> {
    require_capability(&state, &user, ADMINS).await?;

    let target = username.clone();
    let revoked_role = role.clone();
    let removed = run_db(&state, move |db| {
        let row = db.get_user_by_username(&target)?.ok_or(ApiError::NotFound)?;
        Ok(db.revoke_role(row.id, &revoked_role)?)
    })
    .await?;

    if removed {
        info!("{} revoked {} from {}", user.username, role, username);
    } else {
        info!("{} revoked {} from {}, who did not hold it", user.username, role, username);
    }
    Ok(Json(SuccessResponse::ok()))
}
