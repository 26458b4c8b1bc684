//! Session endpoints for cookie and bearer auth.

use super::{
    cookie::{clear_auth_cookie, extract_cookie_token, extract_token},
    state::AuthState,
    types::{ErrorResponse, LogoutResponse, MeResponse, TokenResponse},
};
use crate::token::Identity;
use axum::{
    extract::{Extension, Json},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Resolve the request credential into an identity.
///
/// # Errors
/// Returns a ready `401` response when the credential is missing or invalid.
pub(crate) fn authenticate(headers: &HeaderMap, auth_state: &AuthState) -> Result<Identity, Response> {
    verify(extract_token(headers), auth_state)
}

fn verify(token: Option<String>, auth_state: &AuthState) -> Result<Identity, Response> {
    let Some(token) = token else {
        return Err(unauthorized("No token provided"));
    };
    match auth_state.codec().verify(&token) {
        Ok(claims) => Ok(claims.user),
        Err(err) => {
            debug!("Rejected token: {err}");
            Err(unauthorized("Invalid token"))
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(message))).into_response()
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn me(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    match authenticate(&headers, &auth_state) {
        Ok(user) => (StatusCode::OK, Json(MeResponse { user })).into_response(),
        Err(response) => response,
    }
}

#[utoipa::path(
    get,
    path = "/api/auth/token",
    responses(
        (status = 200, description = "Fresh handoff token for a team portal", body = TokenResponse),
        (status = 401, description = "No valid cookie session", body = ErrorResponse),
        (status = 500, description = "Signing failed", body = ErrorResponse),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn token(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let user = match verify(extract_cookie_token(&headers), &auth_state) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match auth_state.codec().issue(&user) {
        Ok(token) => {
            info!(user_id = user.id, "Issued handoff token");
            (StatusCode::OK, Json(TokenResponse { user, token })).into_response()
        }
        Err(err) => {
            error!(user_id = user.id, "Failed to issue handoff token: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Auth cookie cleared", body = LogoutResponse),
    ),
    tag = "auth"
)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    // Always clear the cookie, present or not.
    let mut headers = HeaderMap::new();
    match clear_auth_cookie(auth_state.config()) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build cleared auth cookie: {err}"),
    }
    (StatusCode::OK, headers, Json(LogoutResponse { success: true })).into_response()
}
