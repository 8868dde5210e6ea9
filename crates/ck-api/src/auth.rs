use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::CookieJar;
use tracing::{error, info, warn};

use ck_db::Database;
use ck_db::queries::insert_user;
use ck_presence::{PresenceTracker, Session, SessionStore};
use ck_types::api::{
    LoginRequest, LoginResponse, MeResponse, RegisterRequest, RegisterResponse, SuccessResponse,
};

use crate::authz::role_view;
use crate::error::ApiError;
use crate::extract::ValidJson;
use crate::middleware::{SESSION_COOKIE, SessionUser, cleared_cookie, session_cookie};
use crate::password;
use crate::registration::{NewAccount, RegistrationRules, validate_registration};
use crate::storage::BlobStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub presence: PresenceTracker,
    pub sessions: SessionStore,
    pub storage: BlobStore,
    pub rules: RegistrationRules,
    /// Mark the session cookie `Secure` (serve over HTTPS only).
    pub secure_cookies: bool,
}

/// Run blocking store work off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Store(anyhow::anyhow!("blocking task failed: {}", e))
        })?
}

pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let account = NewAccount::parse(req)?;

    let plain = account.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || password::hash(&plain))
        .await
        .map_err(|e| ApiError::Store(anyhow::anyhow!("hash task failed: {}", e)))??;

    let rules = state.rules.clone();
    let username = account.username.clone();
    let status = account.status.clone();
    let user_id = run_db(&state, move |db| {
        db.with_tx(|conn| {
            validate_registration(conn, &rules, &username, status.as_deref())?;
            Ok(insert_user(conn, &username, &password_hash, status.as_deref())?)
        })
    })
    .await
    .inspect_err(|e| {
        if let ApiError::Rejected(r) = e {
            warn!("registration of {} rejected: {}", account.username, r);
        }
    })?;

    info!("registered {} (id {})", account.username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            user_id,
            username: account.username,
        }),
    ))
}

/// Check credentials and open a session. Unknown users and wrong passwords
/// produce the same error.
pub async fn authenticate(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<Session, ApiError> {
    let name = username.to_string();
    let plain = password.to_string();
    let verified = run_db(state, move |db| {
        let Some(user) = db.get_user_by_username(&name)? else {
            password::verify_absent(&plain);
            return Ok(None);
        };
        Ok(password::verify(&plain, &user.password).then_some(user.username))
    })
    .await?;

    let Some(username) = verified else {
        warn!("failed login for {}", username);
        return Err(ApiError::InvalidCredentials);
    };

    Ok(state.sessions.create(&username).await)
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = authenticate(&state, &req.username, &req.password).await?;

    // A browser holds one session; replace whatever it had.
    if let Some(previous) = jar.get(SESSION_COOKIE) {
        state.sessions.destroy(previous.value()).await;
    }

    state.presence.touch(&session.username).await;
    info!("{} logged in", session.username);

    let jar = jar.add(session_cookie(session.token, state.secure_cookies));
    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            username: session.username,
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    user: SessionUser,
) -> impl IntoResponse {
    state.sessions.destroy(&user.token).await;
    state.presence.leave(&user.username).await;
    info!("{} logged out", user.username);

    (jar.remove(cleared_cookie()), Json(SuccessResponse::ok()))
}

pub async fn me(
    State(state): State<AppState>,
    user: SessionUser,
) -> Result<Json<MeResponse>, ApiError> {
    let username = user.username.clone();
    let (row, explicit) = run_db(&state, move |db| {
        let Some(row) = db.get_user_by_username(&username)? else {
            return Ok(None);
        };
        let explicit = ck_db::RoleDirectory::roles_of(db, &username)?;
        Ok(Some((row, explicit)))
    })
    .await?
    .ok_or(ApiError::Unauthenticated)?;

    let view = role_view(&explicit, row.status.as_deref());

    Ok(Json(MeResponse {
        username: row.username,
        status: row.status,
        roles: view.roles,
        is_super_admin: view.is_super_admin,
    }))
}

/// Self-service account deletion: role assignments, the user row, presence
/// and every session of the account.
pub async fn delete_account(
    State(state): State<AppState>,
    jar: CookieJar,
    user: SessionUser,
) -> Result<impl IntoResponse, ApiError> {
    let username = user.username.clone();
    let removed_roles = run_db(&state, move |db| Ok(db.delete_user(&username)?))
        .await?
        .ok_or(ApiError::NotFound)?;

    state.presence.leave(&user.username).await;
    let sessions = state.sessions.destroy_user(&user.username).await;
    info!(
        "deleted account {} ({} role assignment(s), {} session(s))",
        user.username, removed_roles, sessions
    );

    Ok((jar.remove(cleared_cookie()), Json(SuccessResponse::ok())))
}
