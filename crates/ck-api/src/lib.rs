pub mod admin;
pub mod auth;
pub mod authz;
pub mod error;
pub mod extract;
pub mod files;
pub mod middleware;
pub mod password;
pub mod posts;
pub mod presence;
pub mod registration;
pub mod routes;
pub mod storage;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use routes::router;
