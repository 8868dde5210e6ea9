use serde::{Deserialize, Serialize};

use crate::models::Visibility;

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub username: String,
}

/// Profile of the session's user. `roles` never contains the hidden
/// super-admin role.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub username: String,
    pub status: Option<String>,
    pub roles: Vec<String>,
    pub is_super_admin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Body of every rejection. `code` is stable; `message` is human readable and
/// never carries store internals.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: String,
    pub message: String,
}

// -- Presence --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUser {
    pub username: String,
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineUsersResponse {
    pub users: Vec<OnlineUser>,
}

// -- Admin --

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub status: Option<String>,
    pub roles: Vec<String>,
    pub is_super_admin: bool,
    /// Pinged or logged in since the process started and not left since.
    pub seen_this_session: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetStatusRequest {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantRoleRequest {
    pub role: String,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: String,
    pub visibility: Visibility,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: i64,
    pub author: String,
    pub content: String,
    pub visibility: Visibility,
    pub attachments: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Uploads --

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub size: u64,
}
