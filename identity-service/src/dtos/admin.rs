use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GrantRoleRequest {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub user_uuid: Uuid,

    #[validate(length(min = 1, max = 64, message = "Role is required"))]
    #[schema(example = "editor")]
    pub role: String,

    /// Scope the grant to a single object
    #[validate(length(equal = 36, message = "Object uuid must be 36 characters"))]
    #[schema(example = "0b7e4c1a-3f2d-4e8b-9a61-5c0d2e7f9b34")]
    pub object_uuid: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GrantRoleResponse {
    /// `false` when the user already held the role
    #[schema(example = true)]
    pub granted: bool,
}
