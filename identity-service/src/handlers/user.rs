use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::user::{AccessResponse, RolesResponse, UpdateProfileRequest, UserResponse, VerifyResponse},
    middleware::Identity,
    utils::ValidatedJson,
    AppState,
};

/// Profile of the authenticated user
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    let overview = state.roles.get_profile(identity.user_id).await?;
    Ok(Json(UserResponse::from(overview)))
}

/// Replace the profile of the authenticated user
#[utoipa::path(
    put,
    path = "/users/me",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_me(
    State(state): State<AppState>,
    identity: Identity,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let overview = state
        .roles
        .update_profile(identity.user_id, req.into())
        .await?;
    Ok(Json(UserResponse::from(overview)))
}

/// Roles of the authenticated user in the service domain
#[utoipa::path(
    get,
    path = "/users/me/roles",
    responses(
        (status = 200, description = "Granted roles", body = RolesResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn my_roles(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, AppError> {
    let roles = state
        .roles
        .get_all_roles(identity.user_id, identity.domain_id, identity.domain_uuid)
        .await?;
    Ok(Json(RolesResponse::from(roles)))
}

/// Whether the authenticated user holds a role
#[utoipa::path(
    get,
    path = "/users/me/access/{role}",
    params(
        ("role" = String, Path, description = "Role value")
    ),
    responses(
        (status = 200, description = "Access decision", body = AccessResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Unknown role", body = ErrorResponse)
    ),
    tag = "User",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn access_check(
    State(state): State<AppState>,
    identity: Identity,
    Path(role): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let has_access = state
        .roles
        .access_check(identity.user_id, identity.domain_id, &role)
        .await?;
    Ok(Json(AccessResponse { has_access }))
}

/// Resolve a bearer token to its owner for other services
#[utoipa::path(
    post,
    path = "/service/external/verify",
    responses(
        (status = 200, description = "Token is valid", body = VerifyResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "Service",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn verify(identity: Identity) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        uuid: identity.user_uuid,
    })
}
