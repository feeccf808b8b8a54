use std::sync::Arc;
use uuid::Uuid;

use crate::models::{GrantedRole, SubjectRole, UserProfile};
use crate::services::{Enforcer, ServiceError};
use crate::store::{RoleLookup, Store, UserLookup};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSummary {
    pub name: String,
    /// Object uuid of a subject-scoped grant
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRoles {
    pub domain: Uuid,
    pub roles: Vec<RoleSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserOverview {
    pub uuid: Uuid,
    pub email: String,
    pub profile: Option<UserProfile>,
}

#[derive(Debug, Clone)]
pub struct RoleGrantInput {
    pub user_uuid: Uuid,
    pub role: String,
    pub object_uuid: Option<String>,
}

/// Read-side role queries and administrative grants.
#[derive(Clone)]
pub struct RoleService {
    store: Arc<dyn Store>,
    enforcer: Enforcer,
}

impl RoleService {
    pub fn new(store: Arc<dyn Store>, enforcer: Enforcer) -> Self {
        Self { store, enforcer }
    }

    /// Roles the user holds in the domain, by name. Grants whose role row is
    /// gone are left out.
    pub async fn get_all_roles(
        &self,
        user_id: i64,
        domain_id: i64,
        domain_uuid: Uuid,
    ) -> Result<DomainRoles, ServiceError> {
        let mut tx = self.store.begin().await?;
        let grants = self
            .enforcer
            .get_roles_for_user_in(tx.as_mut(), user_id, domain_id)
            .await?;

        let mut roles = Vec::with_capacity(grants.len());
        for grant in grants {
            let Some(role) = tx.find_role(&RoleLookup::Id(grant.role_id())).await? else {
                tracing::debug!(user_id, role_id = grant.role_id(), "Skipping grant of a removed role");
                continue;
            };
            roles.push(RoleSummary {
                name: role.name,
                context: grant.object_uuid().map(str::to_string),
            });
        }

        Ok(DomainRoles {
            domain: domain_uuid,
            roles,
        })
    }

    pub async fn access_check(
        &self,
        user_id: i64,
        domain_id: i64,
        role_value: &str,
    ) -> Result<bool, ServiceError> {
        self.enforcer.has_role(user_id, domain_id, role_value).await
    }

    /// Grant a role, optionally scoped to one object, to the user with the
    /// given uuid. Returns `false` when the grant already existed.
    pub async fn grant_role(
        &self,
        domain_id: i64,
        input: RoleGrantInput,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.store.begin().await?;
        let user = tx
            .find_user(&UserLookup::Uuid(input.user_uuid))
            .await?
            .ok_or_else(|| ServiceError::not_found("user"))?;
        let role = tx
            .find_role(&RoleLookup::Value {
                value: input.role.clone(),
                domain_id,
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("role '{}' does not exist", input.role)))?;

        let granted = match input.object_uuid {
            Some(object_uuid) => GrantedRole::Subject(SubjectRole::new(role.id, object_uuid)),
            None => GrantedRole::Role(role.id),
        };
        let added = self
            .enforcer
            .add_role_for_user_in_domain(tx.as_mut(), user.id, &granted, domain_id)
            .await?;
        tx.commit().await?;

        tracing::info!(
            user_id = user.id,
            role = %role.value,
            context = ?granted.object_uuid(),
            added,
            "Role granted"
        );
        Ok(added)
    }

    pub async fn get_profile(&self, user_id: i64) -> Result<UserOverview, ServiceError> {
        let mut tx = self.store.begin().await?;
        let user = tx
            .find_user(&UserLookup::Id(user_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("user"))?;
        let profile = tx.find_profile(user.id).await?;

        Ok(UserOverview {
            uuid: user.uuid,
            email: user.email,
            profile,
        })
    }

    /// Replace the caller's own profile. Only `user_id`'s row is touched.
    pub async fn update_profile(
        &self,
        user_id: i64,
        profile: UserProfile,
    ) -> Result<UserOverview, ServiceError> {
        let mut tx = self.store.begin().await?;
        let user = tx
            .find_user(&UserLookup::Id(user_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("user"))?;
        tx.upsert_profile(user.id, &profile).await?;
        tx.commit().await?;

        tracing::info!(user_id = user.id, "Profile updated");
        Ok(UserOverview {
            uuid: user.uuid,
            email: user.email,
            profile: Some(profile),
        })
    }
}
