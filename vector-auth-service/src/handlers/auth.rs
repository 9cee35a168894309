//! Browser-facing login handlers.
//!
//! Every handler loads the session from the request cookie and commits it
//! back on the response, so state changes made by the authenticator reach
//! the browser.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::services::{CallbackParams, Session};
use crate::AppState;

fn commit(state: &AppState, session: &Session) -> Result<CookieJar, AppError> {
    let cookie = state.sessions.commit(session).map_err(|e| {
        tracing::error!(error = %e, "Failed to encode session cookie");
        AppError::InternalError(e)
    })?;
    Ok(CookieJar::new().add(cookie))
}

/// Start an OAuth login
#[utoipa::path(
    get,
    path = "/auth/{strategy}",
    params(("strategy" = String, Path, description = "Identity provider, e.g. `google`")),
    responses(
        (status = 303, description = "Redirect to the identity provider"),
        (status = 404, description = "Unknown strategy")
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    Path(strategy): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let mut session = state.sessions.load(&headers);
    let url = state.authenticator.challenge(&strategy, &mut session)?;
    let jar = commit(&state, &session)?;
    Ok((jar, Redirect::to(&url)))
}

/// OAuth callback
///
/// Redirects to the frontend on success and to its login page with an
/// `error` query parameter otherwise. Failures never surface as error bodies.
#[utoipa::path(
    get,
    path = "/auth/{strategy}/callback",
    params(
        ("strategy" = String, Path, description = "Identity provider, e.g. `google`"),
        ("code" = Option<String>, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "State issued by the login redirect"),
        ("error" = Option<String>, Query, description = "Provider error code")
    ),
    responses(
        (status = 303, description = "Redirect to the frontend")
    ),
    tag = "Authentication"
)]
pub async fn callback(
    State(state): State<AppState>,
    Path(strategy): Path<String>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let mut session = state.sessions.load(&headers);
    let frontend = state.config.google.frontend_url.trim_end_matches('/');

    let location = match state
        .authenticator
        .authenticate(&strategy, &params, &mut session)
        .await
    {
        Ok(_) => frontend.to_string(),
        Err(e) => {
            let message = e.public_message();
            if session.auth_error.is_none() {
                session.flash_error(message.clone());
            }
            format!("{}/login?error={}", frontend, urlencoding::encode(&message))
        }
    };

    let jar = commit(&state, &session)?;
    Ok((jar, Redirect::to(&location)))
}

/// Log out and drop the session cookie
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "Authentication"
)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let mut session = state.sessions.load(&headers);
    state.authenticator.logout(&mut session);
    (
        CookieJar::new().add(state.sessions.destroy()),
        StatusCode::NO_CONTENT,
    )
}
