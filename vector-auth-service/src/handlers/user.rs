use axum::{response::IntoResponse, Json};

use crate::middleware::AuthUser;

/// Current user profile
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Authenticated user", body = crate::models::User),
        (status = 401, description = "No authenticated session")
    ),
    tag = "User"
)]
pub async fn get_me(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(user)
}
