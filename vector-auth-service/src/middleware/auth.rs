use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::IntoResponse,
};
use service_core::error::AppError;

use crate::{models::User, AppState};

/// Reject requests whose session carries no authenticated user.
pub async fn session_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AppError> {
    let session = state.sessions.load(req.headers());

    let user = state
        .authenticator
        .is_authenticated(&session)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Not authenticated")))?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Extractor for the user placed by [`session_auth_middleware`].
pub struct AuthUser(pub User);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts.extensions.get::<User>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Session user missing from request extensions"
            ))
        })?;

        Ok(AuthUser(user.clone()))
    }
}
