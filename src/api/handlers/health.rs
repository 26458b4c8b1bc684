use crate::{directory::UserDirectory, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::Extension,
    http::{header::InvalidHeaderValue, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    directory: String,
    directory_kind: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "User directory is reachable", body = Health),
        (status = 503, description = "User directory is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(
    method: Method,
    directory: Extension<Arc<dyn UserDirectory>>,
) -> impl IntoResponse {
    let result = directory.ping().await;
    if let Err(err) = &result {
        error!("User directory ping failed: {err:#}");
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        directory: if result.is_ok() { "ok" } else { "error" }.to_string(),
        directory_kind: directory.kind().to_string(),
    };

    // OPTIONS probes only need the status and header
    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let mut headers = HeaderMap::new();
    match app_header(&health) {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to build X-App header: {err}"),
    }

    let status = if result.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, headers, body)
}

/// `name:version:short-commit`, e.g. `large-event-auth:0.1.0:1a2b3c4`.
fn app_header(health: &Health) -> Result<HeaderValue, InvalidHeaderValue> {
    let short_commit = health.commit.get(..7).unwrap_or(health.commit.as_str());
    HeaderValue::from_str(&format!("{}:{}:{short_commit}", health.name, health.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use anyhow::Result;
    use axum::{body::to_bytes, http::Request, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        let directory: Arc<dyn UserDirectory> = Arc::new(MemoryDirectory::seeded());
        Router::new()
            .route("/health", get(health).options(health))
            .layer(Extension(directory))
    }

    #[tokio::test]
    async fn get_reports_directory_and_version() -> Result<()> {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let x_app = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();
        assert!(x_app.starts_with(&format!(
            "{}:{}:",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )));

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let payload: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(payload["directory"], "ok");
        assert_eq!(payload["directory_kind"], "memory");
        assert_eq!(payload["name"], env!("CARGO_PKG_NAME"));
        Ok(())
    }

    #[tokio::test]
    async fn options_has_empty_body() -> Result<()> {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(body.is_empty());
        Ok(())
    }
}
