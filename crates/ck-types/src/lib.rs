//! Wire schemas and domain constants shared by the store, API and server crates.

pub mod api;
pub mod models;
