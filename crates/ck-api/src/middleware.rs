use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::auth::AppState;
use crate::error::ApiError;

pub const SESSION_COOKIE: &str = "ck_session";

/// The signed-in user behind the request's session cookie.
///
/// Extracting it from an anonymous request fails with `Unauthenticated`.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub username: String,
    pub token: String,
}

/// The caller as resolved by [`resolve_session`]: signed in or anonymous.
#[derive(Debug, Clone, Default)]
pub struct Viewer(pub Option<SessionUser>);

impl Viewer {
    pub fn username(&self) -> Option<&str> {
        self.0.as_ref().map(|u| u.username.as_str())
    }
}

/// Resolve the session cookie (if any) and stash the result for extractors.
pub async fn resolve_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let mut viewer = Viewer::default();
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let token = cookie.value();
        if let Some(username) = state.sessions.current_user(token).await {
            viewer.0 = Some(SessionUser {
                username,
                token: token.to_string(),
            });
        }
    }

    req.extensions_mut().insert(viewer);
    next.run(req).await
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Viewer>().cloned().unwrap_or_default())
    }
}

impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Viewer>()
            .and_then(|v| v.0.clone())
            .ok_or(ApiError::Unauthenticated)
    }
}

pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Cookie to hand to [`CookieJar::remove`] so the browser drops the session.
pub fn cleared_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}
