//! The `auth-token` cookie and credential extraction.

use super::state::AuthConfig;
use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};

pub const AUTH_COOKIE_NAME: &str = "auth-token";

/// Build the `HttpOnly` cookie carrying `token`, valid as long as the token.
pub(super) fn auth_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.token_ttl_seconds();
    let cookie = with_attributes(
        config,
        format!("{AUTH_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"),
    );
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_auth_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let cookie = with_attributes(
        config,
        format!("{AUTH_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
    HeaderValue::from_str(&cookie)
}

fn with_attributes(config: &AuthConfig, mut cookie: String) -> String {
    if let Some(domain) = config.cookie_domain() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Bearer header first, then the cookie.
pub(crate) fn extract_token(headers: &HeaderMap) -> Option<String> {
    extract_bearer_token(headers).or_else(|| extract_cookie_token(headers))
}

pub(crate) fn extract_cookie_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == AUTH_COOKIE_NAME && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
