//! Domain-scoped role grants.
//!
//! Grants are `(user, role, domain)` tuples kept in the `policy_grants` table.
//! Every decision reads them through the caller's transaction, so nothing is
//! cached between requests and a check only sees what that transaction sees.

use std::collections::HashSet;
use std::sync::Arc;

use crate::models::{GrantedRole, PolicyGrant, SubjectRole};
use crate::services::ServiceError;
use crate::store::{RoleLookup, Store, Transaction};

#[derive(Clone)]
pub struct Enforcer {
    store: Arc<dyn Store>,
}

impl Enforcer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Read every committed grant and make sure each one decodes.
    /// Returns the number of grants.
    pub async fn load_policy(&self) -> Result<usize, ServiceError> {
        let mut tx = self.store.begin().await?;
        let grants = Self::load_policy_in(tx.as_mut()).await?;
        for grant in &grants {
            GrantedRole::decode(&grant.role)?;
        }
        Ok(grants.len())
    }

    /// Grants visible to `tx`, including its own uncommitted ones.
    pub async fn load_policy_in(
        tx: &mut dyn Transaction,
    ) -> Result<HashSet<PolicyGrant>, ServiceError> {
        Ok(tx.load_grants().await?.into_iter().collect())
    }

    async fn resolve_role_id(
        tx: &mut dyn Transaction,
        domain_id: i64,
        role_value: &str,
    ) -> Result<i64, ServiceError> {
        tx.find_role(&RoleLookup::Value {
            value: role_value.to_string(),
            domain_id,
        })
        .await?
        .map(|role| role.id)
        .ok_or_else(|| ServiceError::NotFound(format!("role '{}' does not exist", role_value)))
    }

    pub async fn has_role_for_user(
        &self,
        tx: &mut dyn Transaction,
        user_id: i64,
        role: &GrantedRole,
        domain_id: i64,
    ) -> Result<bool, ServiceError> {
        let grants = Self::load_policy_in(tx).await?;
        Ok(grants.contains(&PolicyGrant::new(user_id, role, domain_id)))
    }

    /// Whether the user holds the role named `role_value` in the domain.
    ///
    /// Fails with `NotFound` when no such role exists.
    pub async fn has_role(
        &self,
        user_id: i64,
        domain_id: i64,
        role_value: &str,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.store.begin().await?;
        self.has_role_in(tx.as_mut(), user_id, domain_id, role_value)
            .await
    }

    pub async fn has_role_in(
        &self,
        tx: &mut dyn Transaction,
        user_id: i64,
        domain_id: i64,
        role_value: &str,
    ) -> Result<bool, ServiceError> {
        let role_id = Self::resolve_role_id(tx, domain_id, role_value).await?;
        self.has_role_for_user(tx, user_id, &GrantedRole::Role(role_id), domain_id)
            .await
    }

    /// Whether the user holds `role_value` scoped to one object instance.
    pub async fn has_role_with_subject(
        &self,
        user_id: i64,
        domain_id: i64,
        role_value: &str,
        object_uuid: &str,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.store.begin().await?;
        let role_id = Self::resolve_role_id(tx.as_mut(), domain_id, role_value).await?;
        let subject = GrantedRole::Subject(SubjectRole::new(role_id, object_uuid));
        self.has_role_for_user(tx.as_mut(), user_id, &subject, domain_id)
            .await
    }

    /// Grant a role inside the caller's transaction. Granting an existing
    /// role is a no-op; returns whether a new grant was written.
    pub async fn add_role_for_user_in_domain(
        &self,
        tx: &mut dyn Transaction,
        user_id: i64,
        role: &GrantedRole,
        domain_id: i64,
    ) -> Result<bool, ServiceError> {
        if let GrantedRole::Subject(subject) = role {
            SubjectRole::decode(&subject.encode())?;
        }
        let added = tx
            .insert_grant(&PolicyGrant::new(user_id, role, domain_id))
            .await?;
        if added {
            tracing::debug!(user_id, domain_id, role = %role.encode(), "Role granted");
        }
        Ok(added)
    }

    /// Every role the user holds in the domain, decoded.
    pub async fn get_roles_for_user(
        &self,
        user_id: i64,
        domain_id: i64,
    ) -> Result<Vec<GrantedRole>, ServiceError> {
        let mut tx = self.store.begin().await?;
        self.get_roles_for_user_in(tx.as_mut(), user_id, domain_id)
            .await
    }

    pub async fn get_roles_for_user_in(
        &self,
        tx: &mut dyn Transaction,
        user_id: i64,
        domain_id: i64,
    ) -> Result<Vec<GrantedRole>, ServiceError> {
        let grants = Self::load_policy_in(tx).await?;

        let subject = user_id.to_string();
        let domain = domain_id.to_string();
        let mut roles = grants
            .iter()
            .filter(|g| g.subject == subject && g.domain == domain)
            .map(|g| GrantedRole::decode(&g.role).map_err(ServiceError::from))
            .collect::<Result<Vec<_>, _>>()?;
        roles.sort_by(|a, b| {
            a.role_id()
                .cmp(&b.role_id())
                .then_with(|| a.object_uuid().cmp(&b.object_uuid()))
        });
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Domain, NewUser, Role, User};
    use crate::services::ErrorKind;
    use crate::store::MemoryStore;

    const OBJECT: &str = "0b7e4c1a-3f2d-4e8b-9a61-5c0d2e7f9b34";

    struct Fixture {
        store: MemoryStore,
        enforcer: Enforcer,
        user: User,
        domain: Domain,
        client: Role,
        editor: Role,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let domain = store.seed_domain("crm", "CRM").await;
        let client = store.seed_role("client", "Client", Some(domain.id)).await;
        let editor = store.seed_role("editor", "Editor", None).await;

        let mut tx = store.begin().await.unwrap();
        let user = tx
            .insert_user(&NewUser::new("a@x.com", "hash"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let enforcer = Enforcer::new(Arc::new(store.clone()));
        Fixture {
            store,
            enforcer,
            user,
            domain,
            client,
            editor,
        }
    }

    async fn grant(f: &Fixture, role: GrantedRole) -> bool {
        let mut tx = f.store.begin().await.unwrap();
        let added = f
            .enforcer
            .add_role_for_user_in_domain(tx.as_mut(), f.user.id, &role, f.domain.id)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        added
    }

    #[tokio::test]
    async fn test_has_role_sees_committed_grant() {
        let f = fixture().await;
        assert!(!f
            .enforcer
            .has_role(f.user.id, f.domain.id, "client")
            .await
            .unwrap());

        grant(&f, GrantedRole::Role(f.client.id)).await;

        assert!(f
            .enforcer
            .has_role(f.user.id, f.domain.id, "client")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_role_is_not_found() {
        let f = fixture().await;
        let err = f
            .enforcer
            .has_role(f.user.id, f.domain.id, "owner")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_grant_is_idempotent() {
        let f = fixture().await;
        assert!(grant(&f, GrantedRole::Role(f.client.id)).await);
        assert!(!grant(&f, GrantedRole::Role(f.client.id)).await);
        assert_eq!(f.store.table_sizes().await.grants, 1);
    }

    #[tokio::test]
    async fn test_uncommitted_grant_is_invisible_outside_tx() {
        let f = fixture().await;
        {
            let mut tx = f.store.begin().await.unwrap();
            f.enforcer
                .add_role_for_user_in_domain(
                    tx.as_mut(),
                    f.user.id,
                    &GrantedRole::Role(f.client.id),
                    f.domain.id,
                )
                .await
                .unwrap();
            assert!(f
                .enforcer
                .has_role_in(tx.as_mut(), f.user.id, f.domain.id, "client")
                .await
                .unwrap());
        }

        assert!(!f
            .enforcer
            .has_role(f.user.id, f.domain.id, "client")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_subject_grant_is_scoped_to_object() {
        let f = fixture().await;
        grant(
            &f,
            GrantedRole::Subject(SubjectRole::new(f.editor.id, OBJECT)),
        )
        .await;

        assert!(f
            .enforcer
            .has_role_with_subject(f.user.id, f.domain.id, "editor", OBJECT)
            .await
            .unwrap());
        assert!(!f
            .enforcer
            .has_role_with_subject(
                f.user.id,
                f.domain.id,
                "editor",
                "11111111-2222-3333-4444-555555555555"
            )
            .await
            .unwrap());
        // A scoped grant does not imply the bare role.
        assert!(!f
            .enforcer
            .has_role(f.user.id, f.domain.id, "editor")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_roles_for_user_are_decoded() {
        let f = fixture().await;
        grant(&f, GrantedRole::Role(f.client.id)).await;
        grant(
            &f,
            GrantedRole::Subject(SubjectRole::new(f.editor.id, OBJECT)),
        )
        .await;

        let roles = f
            .enforcer
            .get_roles_for_user(f.user.id, f.domain.id)
            .await
            .unwrap();
        assert_eq!(roles.len(), 2);
        assert!(roles.contains(&GrantedRole::Role(f.client.id)));
        assert!(roles
            .iter()
            .any(|r| r.role_id() == f.editor.id && r.object_uuid() == Some(OBJECT)));

        let other_domain = f
            .enforcer
            .get_roles_for_user(f.user.id, f.domain.id + 100)
            .await
            .unwrap();
        assert!(other_domain.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_subject_grant_is_rejected() {
        let f = fixture().await;
        let mut tx = f.store.begin().await.unwrap();
        let err = f
            .enforcer
            .add_role_for_user_in_domain(
                tx.as_mut(),
                f.user.id,
                &GrantedRole::Subject(SubjectRole::new(f.editor.id, "short")),
                f.domain.id,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_clones_share_no_state() {
        let f = fixture().await;
        let other = f.enforcer.clone();
        {
            let mut tx = f.store.begin().await.unwrap();
            f.enforcer
                .add_role_for_user_in_domain(
                    tx.as_mut(),
                    f.user.id,
                    &GrantedRole::Role(f.client.id),
                    f.domain.id,
                )
                .await
                .unwrap();
            assert!(f
                .enforcer
                .has_role_in(tx.as_mut(), f.user.id, f.domain.id, "client")
                .await
                .unwrap());
        }

        // The rolled back grant must not linger for any enforcer.
        assert!(!other
            .has_role(f.user.id, f.domain.id, "client")
            .await
            .unwrap());
        assert!(other
            .get_roles_for_user(f.user.id, f.domain.id)
            .await
            .unwrap()
            .is_empty());

        grant(&f, GrantedRole::Role(f.client.id)).await;
        assert!(other
            .has_role(f.user.id, f.domain.id, "client")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_load_policy_counts_and_validates_grants() {
        let f = fixture().await;
        assert_eq!(f.enforcer.load_policy().await.unwrap(), 0);

        grant(&f, GrantedRole::Role(f.client.id)).await;
        assert_eq!(f.enforcer.load_policy().await.unwrap(), 1);

        let mut tx = f.store.begin().await.unwrap();
        tx.insert_grant(&PolicyGrant {
            subject: f.user.id.to_string(),
            role: "not-a-role".to_string(),
            domain: f.domain.id.to_string(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let err = f.enforcer.load_policy().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
