use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{info, warn};

use ck_db::models::PostRow;
use ck_types::api::{CreatePostRequest, PostResponse, SuccessResponse};
use ck_types::models::Visibility;

use crate::auth::{AppState, run_db};
use crate::authz::{MODERATORS, POST_WRITERS, capability_of, require_capability};
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::{SessionUser, Viewer};

const MAX_CONTENT_CHARS: usize = 10_000;
const MAX_ATTACHMENTS: usize = 10;
const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct PostQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// GET /api/posts: what the caller may see, newest first.
pub async fn list_posts(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<PostQuery>,
) -> Result<Json<Vec<PostResponse>>, ApiError> {
    let mut visible = vec![Visibility::Public.as_str()];
    if capability_of(&state, viewer.username(), POST_WRITERS).await? {
        visible.push(Visibility::Members.as_str());
    }
    if capability_of(&state, viewer.username(), MODERATORS).await? {
        visible.push(Visibility::Officers.as_str());
    }

    let limit = query.limit.min(MAX_PAGE);
    let rows = run_db(&state, move |db| Ok(db.list_posts(&visible, limit)?)).await?;

    Ok(Json(rows.into_iter().map(to_response).collect()))
}

/// POST /api/posts
pub async fn create_post(
    State(state): State<AppState>,
    user: SessionUser,
    body: Result<ValidJson<CreatePostRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    // Capability first: a malformed body from a non-writer is still a 403.
    require_capability(&state, &user, POST_WRITERS).await?;
    let ValidJson(req) = body?;

    let content = req.content.trim().to_string();
    if content.is_empty() || content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::Validation(format!(
            "content must be 1-{} characters",
            MAX_CONTENT_CHARS
        )));
    }
    if req.attachments.len() > MAX_ATTACHMENTS {
        return Err(ApiError::Validation(format!(
            "at most {} attachments",
            MAX_ATTACHMENTS
        )));
    }
    for path in &req.attachments {
        if !state.storage.contains_path(path).await {
            return Err(ApiError::Validation(format!("unknown attachment '{}'", path)));
        }
    }

    let author = user.username.clone();
    let visibility = req.visibility;
    let attachments = req.attachments;
    let row = run_db(&state, move |db| {
        Ok(db.insert_post(&author, &content, visibility.as_str(), &attachments)?)
    })
    .await?;

    info!("{} created post {} ({})", user.username, row.id, visibility);

    Ok((StatusCode::CREATED, Json(to_response(row))))
}

/// DELETE /api/posts/{id}: own posts, or any post for moderators.
pub async fn delete_post(
    State(state): State<AppState>,
    user: SessionUser,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let post = run_db(&state, move |db| Ok(db.get_post(id)?))
        .await?
        .ok_or(ApiError::NotFound)?;

    if post.author != user.username {
        require_capability(&state, &user, MODERATORS).await?;
    }

    let removed = run_db(&state, move |db| Ok(db.delete_post(id)?)).await?;
    if !removed {
        return Err(ApiError::NotFound);
    }

    info!("{} deleted post {} by {}", user.username, id, post.author);
    Ok(Json(SuccessResponse::ok()))
}

fn to_response(row: PostRow) -> PostResponse {
    let visibility = row.visibility.parse::<Visibility>().unwrap_or_else(|e| {
        warn!("Corrupt visibility on post {}: {}", row.id, e);
        Visibility::Officers
    });

    PostResponse {
        id: row.id,
        author: row.author,
        content: row.content,
        visibility,
        attachments: row.attachments,
        created_at: row
            .created_at
            .parse::<chrono::DateTime<chrono::Utc>>()
            .or_else(|_| {
                // SQLite's datetime('now') has no timezone; it is UTC.
                chrono::NaiveDateTime::parse_from_str(&row.created_at, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| ndt.and_utc())
            })
            .unwrap_or_else(|e| {
                warn!("Corrupt created_at '{}' on post {}: {}", row.created_at, row.id, e);
                chrono::DateTime::default()
            }),
    }
}
