//! Wire types for the `/auth` endpoints.

use serde::{Deserialize, Serialize};

use crate::session::Session;

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangeRequest<'a> {
    pub current_password: &'a str,
    pub new_password: &'a str,
}

/// User as returned by `/auth/login` and `/auth/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserResponse {
    #[serde(alias = "userId", alias = "id")]
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl From<UserResponse> for Session {
    fn from(user: UserResponse) -> Self {
        Session::new(user.username, user.roles)
    }
}
