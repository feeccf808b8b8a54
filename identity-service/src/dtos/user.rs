use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::UserProfile;
use crate::services::{DomainRoles, RoleSummary, UserOverview};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub uuid: Uuid,
    #[schema(example = "user@example.com")]
    pub email: String,
    pub profile: Option<UserProfile>,
}

impl From<UserOverview> for UserResponse {
    fn from(overview: UserOverview) -> Self {
        Self {
            uuid: overview.uuid,
            email: overview.email,
            profile: overview.profile,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    #[schema(example = "Ada")]
    pub name: String,

    #[validate(length(min = 1, max = 100, message = "Surname is required"))]
    #[schema(example = "Lovelace")]
    pub surname: String,

    #[validate(length(max = 32))]
    #[schema(example = "+44 20 7946 0000")]
    pub phone: Option<String>,
}

impl From<UpdateProfileRequest> for UserProfile {
    fn from(req: UpdateProfileRequest) -> Self {
        Self {
            name: req.name,
            surname: req.surname,
            phone: req.phone,
        }
    }
}

/// Answer to another service asking who owns an access token.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyResponse {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub uuid: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoleEntry {
    #[schema(example = "Client")]
    pub name: String,
    /// Object the role is scoped to
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[schema(example = "0b7e4c1a-3f2d-4e8b-9a61-5c0d2e7f9b34")]
    pub context: Option<String>,
}

impl From<RoleSummary> for RoleEntry {
    fn from(summary: RoleSummary) -> Self {
        Self {
            name: summary.name,
            context: summary.context,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RolesResponse {
    #[schema(example = "9a1c7e52-44b0-4f3e-8d2a-6b5f0c1e7a90")]
    pub domain: Uuid,
    pub roles: Vec<RoleEntry>,
}

impl From<DomainRoles> for RolesResponse {
    fn from(roles: DomainRoles) -> Self {
        Self {
            domain: roles.domain,
            roles: roles.roles.into_iter().map(RoleEntry::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccessResponse {
    #[schema(example = true)]
    pub has_access: bool,
}
