use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::admin::{GrantRoleRequest, GrantRoleResponse},
    middleware::Identity,
    services::RoleGrantInput,
    utils::ValidatedJson,
    AppState,
};

/// Grant a role to a user, optionally scoped to one object
#[utoipa::path(
    post,
    path = "/admin/roles/grant",
    request_body = GrantRoleRequest,
    responses(
        (status = 200, description = "Grant stored", body = GrantRoleResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Caller is not an administrator", body = ErrorResponse),
        (status = 404, description = "Unknown user or role", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Admin",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn grant_role(
    State(state): State<AppState>,
    identity: Identity,
    ValidatedJson(req): ValidatedJson<GrantRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let granted = state
        .roles
        .grant_role(
            identity.domain_id,
            RoleGrantInput {
                user_uuid: req.user_uuid,
                role: req.role,
                object_uuid: req.object_uuid,
            },
        )
        .await?;

    tracing::info!(admin_id = identity.user_id, granted, "Admin role grant processed");
    Ok(Json(GrantRoleResponse { granted }))
}
