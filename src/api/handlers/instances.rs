use super::auth::{session::authenticate, types::ErrorResponse, AuthState};
use crate::{directory::UserDirectory, instances::InstanceListResponse};
use axum::{
    extract::{Extension, Json},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

#[utoipa::path(
    get,
    path = "/api/instances",
    responses(
        (status = 200, description = "Instances the caller may open", body = InstanceListResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 500, description = "Directory lookup failed", body = ErrorResponse),
    ),
    tag = "instances"
)]
#[instrument(skip_all)]
pub async fn instances(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    directory: Extension<Arc<dyn UserDirectory>>,
) -> impl IntoResponse {
    let user = match authenticate(&headers, &auth_state) {
        Ok(user) => user,
        Err(response) => return response,
    };

    match directory.instances_for(&user).await {
        Ok(instances) => {
            debug!(user_id = user.id, count = instances.len(), "Listed instances");
            (StatusCode::OK, Json(InstanceListResponse::new(instances))).into_response()
        }
        Err(err) => {
            error!(user_id = user.id, "Failed to fetch instances: {err:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to fetch instances")),
            )
                .into_response()
        }
    }
}
