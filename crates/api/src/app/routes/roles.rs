//! Role grant administration. RBAC maps `roles` to the admin module.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use keystone_auth::Role;

use crate::app::routes::common::json_body;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

/// GET /api/v1/roles
pub async fn list_roles(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let roles: Vec<String> = services
        .permissions
        .roles()
        .iter()
        .map(ToString::to_string)
        .collect();
    (StatusCode::OK, Json(serde_json::json!({ "roles": roles }))).into_response()
}

/// GET /api/v1/roles/:role/permissions
pub async fn get_role_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(role): Path<String>,
) -> axum::response::Response {
    let grants = services.permissions.role_permissions(&role);
    (
        StatusCode::OK,
        Json(dto::RolePermissionsResponse {
            role,
            permissions: dto::grants_to_dto(&grants),
        }),
    )
        .into_response()
}

/// PUT /api/v1/roles/:role/permissions
///
/// Replaces the role's entire grant set.
pub async fn set_role_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(role): Path<String>,
    body: Result<Json<dto::SetRolePermissionsRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let role = Role::from(role);

    if let Err(err) = services
        .permissions
        .set_role_permissions(&role, body.permissions.iter().map(|g| (g.module, g.action)))
        .await
    {
        return errors::auth_error_to_response(err);
    }
    info!(
        role = %role,
        grants = body.permissions.len(),
        changed_by = %principal.user_id(),
        "role permissions replaced"
    );

    let grants = services.permissions.role_permissions(role.as_str());
    (
        StatusCode::OK,
        Json(dto::RolePermissionsResponse {
            role: role.to_string(),
            permissions: dto::grants_to_dto(&grants),
        }),
    )
        .into_response()
}
