//! Client for the backend's authentication endpoints.

pub mod client;
pub mod types;

pub use client::{build_url, ApiError, AuthClient};
pub use types::{LoginRequest, PasswordChangeRequest, UserResponse};
