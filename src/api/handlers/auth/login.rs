use super::{
    cookie::auth_cookie,
    state::AuthState,
    types::{ErrorResponse, LoginRequest, LoginResponse},
    utils::{normalize_email, valid_email},
};
use crate::directory::UserDirectory;
use axum::{
    extract::{Extension, Json},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; sets the auth cookie unless disabled", body = LoginResponse),
        (status = 400, description = "Missing or malformed email", body = ErrorResponse),
        (status = 401, description = "Unknown email", body = ErrorResponse),
        (status = 500, description = "Lookup or signing failed", body = ErrorResponse),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    directory: Extension<Arc<dyn UserDirectory>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let email = normalize_email(request.email.as_deref().unwrap_or_default());
    if email.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Email is required")),
        )
            .into_response();
    }
    if !valid_email(&email) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid email format")),
        )
            .into_response();
    }

    let user = match directory.find_by_email(&email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("Login attempt for unknown email");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new(
                    "User not found. Please contact administrator.",
                )),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to look up user: {err:#}");
            return internal_error();
        }
    };

    let token = match auth_state.codec().issue(&user) {
        Ok(token) => token,
        Err(err) => {
            error!(user_id = user.id, "Failed to issue token: {err}");
            return internal_error();
        }
    };

    let mut headers = HeaderMap::new();
    if auth_state.config().cookie_enabled() {
        match auth_cookie(auth_state.config(), &token) {
            Ok(cookie) => {
                headers.insert(SET_COOKIE, cookie);
            }
            Err(err) => {
                error!("Failed to build auth cookie: {err}");
                return internal_error();
            }
        }
    }

    info!(user_id = user.id, "User logged in");
    (
        StatusCode::OK,
        headers,
        Json(LoginResponse {
            success: true,
            user: Some(user),
            token: Some(token),
        }),
    )
        .into_response()
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error")),
    )
        .into_response()
}
