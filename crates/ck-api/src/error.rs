use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use ck_db::UserWriteError;
use ck_types::api::ErrorBody;

use crate::registration::Rejection;

/// Every way a request can fail. Only [`ApiError::code`] and the display
/// text cross the HTTP boundary; store details go to the log.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("{0}")]
    Rejected(Rejection),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("internal server error")]
    Store(#[source] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Forbidden => "forbidden",
            Self::Rejected(r) => r.code(),
            Self::Validation(_) => "validation",
            Self::NotFound => "not_found",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Store(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Rejected(Rejection::FounderNotAllowed) => StatusCode::FORBIDDEN,
            Self::Rejected(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Store(e)
    }
}

impl From<Rejection> for ApiError {
    fn from(r: Rejection) -> Self {
        Self::Rejected(r)
    }
}

impl From<UserWriteError> for ApiError {
    fn from(e: UserWriteError) -> Self {
        match e {
            UserWriteError::UsernameTaken => Self::Rejected(Rejection::UsernameTaken),
            UserWriteError::StatusTaken => Self::Rejected(Rejection::StatusTaken),
            UserWriteError::Store(e) => Self::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Store(e) = &self {
            error!("store failure: {:#}", e);
        }

        let body = ErrorBody {
            success: false,
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
