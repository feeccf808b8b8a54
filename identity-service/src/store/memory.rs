//! In-process store with the same transactional semantics as [`PgStore`](super::PgStore).
//!
//! A transaction takes the store lock, works on a copy of the state and writes
//! the copy back on commit. Transactions are therefore fully serialized, and a
//! task must not begin a second transaction while it still holds one.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{AuthTypeLookup, DomainLookup, RoleLookup, Store, Transaction, UserLookup};
use crate::models::{
    Activation, AuthKind, AuthType, Domain, NewUser, PolicyGrant, ResetToken, Role, TokenPair,
    User, UserProfile,
};
use crate::services::ServiceError;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    users: Vec<User>,
    profiles: HashMap<i64, UserProfile>,
    domains: Vec<Domain>,
    roles: Vec<Role>,
    auth_types: Vec<AuthType>,
    user_auth_types: HashMap<i64, i64>,
    grants: Vec<PolicyGrant>,
    token_pairs: Vec<TokenPair>,
    reset_tokens: Vec<ResetToken>,
    activations: Vec<Activation>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Row counts, for asserting on what an operation left behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableSizes {
    pub users: usize,
    pub profiles: usize,
    pub auth_links: usize,
    pub grants: usize,
    pub token_pairs: usize,
    pub reset_tokens: usize,
    pub activations: usize,
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with the `LOCAL` and `GOOGLE` auth types in place.
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        for kind in [AuthKind::Local, AuthKind::Google] {
            let id = state.next_id();
            state.auth_types.push(AuthType {
                id,
                uuid: Uuid::new_v4(),
                value: kind.as_str().to_string(),
            });
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub async fn seed_domain(&self, value: &str, name: &str) -> Domain {
        let mut state = self.state.lock().await;
        let domain = Domain {
            id: state.next_id(),
            uuid: Uuid::new_v4(),
            value: value.to_string(),
            name: name.to_string(),
        };
        state.domains.push(domain.clone());
        domain
    }

    pub async fn seed_role(&self, value: &str, name: &str, domain_id: Option<i64>) -> Role {
        let mut state = self.state.lock().await;
        let role = Role {
            id: state.next_id(),
            uuid: Uuid::new_v4(),
            value: value.to_string(),
            name: name.to_string(),
            domains_id: domain_id,
            users_id: None,
        };
        state.roles.push(role.clone());
        role
    }

    /// Remove a user row out of band, as an operator would.
    pub async fn remove_user(&self, uuid: Uuid) -> bool {
        let mut state = self.state.lock().await;
        let before = state.users.len();
        state.users.retain(|u| u.uuid != uuid);
        before != state.users.len()
    }

    /// Remove a role row out of band; its grants stay behind.
    pub async fn remove_role(&self, role_id: i64) -> bool {
        let mut state = self.state.lock().await;
        let before = state.roles.len();
        state.roles.retain(|r| r.id != role_id);
        before != state.roles.len()
    }

    /// Remove a domain row out of band; roles and grants stay behind.
    pub async fn remove_domain(&self, domain_id: i64) -> bool {
        let mut state = self.state.lock().await;
        let before = state.domains.len();
        state.domains.retain(|d| d.id != domain_id);
        before != state.domains.len()
    }

    pub async fn table_sizes(&self) -> TableSizes {
        let state = self.state.lock().await;
        TableSizes {
            users: state.users.len(),
            profiles: state.profiles.len(),
            auth_links: state.user_auth_types.len(),
            grants: state.grants.len(),
            token_pairs: state.token_pairs.len(),
            reset_tokens: state.reset_tokens.len(),
            activations: state.activations.len(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, ServiceError> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

fn conflict(what: &str) -> ServiceError {
    ServiceError::Conflict(format!("{} already exists", what))
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn find_user(&mut self, lookup: &UserLookup) -> Result<Option<User>, ServiceError> {
        let users = &self.working.users;
        Ok(match lookup {
            UserLookup::Id(id) => users.iter().find(|u| u.id == *id),
            UserLookup::Uuid(uuid) => users.iter().find(|u| u.uuid == *uuid),
            UserLookup::Email(email) => users.iter().find(|u| u.email.eq_ignore_ascii_case(email)),
        }
        .cloned())
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<User, ServiceError> {
        let state = &mut self.working;
        if state
            .users
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email) || u.uuid == user.uuid)
        {
            return Err(conflict("user"));
        }
        let row = User {
            id: state.next_id(),
            uuid: user.uuid,
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            created_at: Utc::now(),
        };
        state.users.push(row.clone());
        Ok(row)
    }

    async fn update_password_hash(
        &mut self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<(), ServiceError> {
        if let Some(user) = self.working.users.iter_mut().find(|u| u.id == user_id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn insert_profile(
        &mut self,
        user_id: i64,
        profile: &UserProfile,
    ) -> Result<(), ServiceError> {
        if self.working.profiles.contains_key(&user_id) {
            return Err(conflict("profile"));
        }
        self.working.profiles.insert(user_id, profile.clone());
        Ok(())
    }

    async fn find_profile(&mut self, user_id: i64) -> Result<Option<UserProfile>, ServiceError> {
        Ok(self.working.profiles.get(&user_id).cloned())
    }

    async fn upsert_profile(
        &mut self,
        user_id: i64,
        profile: &UserProfile,
    ) -> Result<(), ServiceError> {
        self.working.profiles.insert(user_id, profile.clone());
        Ok(())
    }

    async fn find_domain(&mut self, lookup: &DomainLookup) -> Result<Option<Domain>, ServiceError> {
        let domains = &self.working.domains;
        Ok(match lookup {
            DomainLookup::Id(id) => domains.iter().find(|d| d.id == *id),
            DomainLookup::Uuid(uuid) => domains.iter().find(|d| d.uuid == *uuid),
            DomainLookup::Value(value) => domains.iter().find(|d| &d.value == value),
        }
        .cloned())
    }

    async fn find_role(&mut self, lookup: &RoleLookup) -> Result<Option<Role>, ServiceError> {
        let roles = &self.working.roles;
        Ok(match lookup {
            RoleLookup::Id(id) => roles.iter().find(|r| r.id == *id),
            RoleLookup::Uuid(uuid) => roles.iter().find(|r| r.uuid == *uuid),
            RoleLookup::Value { value, domain_id } => roles
                .iter()
                .find(|r| &r.value == value && r.domains_id == Some(*domain_id))
                .or_else(|| {
                    roles
                        .iter()
                        .find(|r| &r.value == value && r.domains_id.is_none())
                }),
        }
        .cloned())
    }

    async fn find_auth_type(
        &mut self,
        lookup: &AuthTypeLookup,
    ) -> Result<Option<AuthType>, ServiceError> {
        let auth_types = &self.working.auth_types;
        Ok(match lookup {
            AuthTypeLookup::Id(id) => auth_types.iter().find(|a| a.id == *id),
            AuthTypeLookup::Uuid(uuid) => auth_types.iter().find(|a| a.uuid == *uuid),
            AuthTypeLookup::Kind(kind) => auth_types.iter().find(|a| a.value == kind.as_str()),
        }
        .cloned())
    }

    async fn link_auth_type(
        &mut self,
        user_id: i64,
        auth_type_id: i64,
    ) -> Result<(), ServiceError> {
        self.working.user_auth_types.insert(user_id, auth_type_id);
        Ok(())
    }

    async fn find_user_auth_type(
        &mut self,
        user_id: i64,
    ) -> Result<Option<AuthType>, ServiceError> {
        let Some(auth_type_id) = self.working.user_auth_types.get(&user_id) else {
            return Ok(None);
        };
        Ok(self
            .working
            .auth_types
            .iter()
            .find(|a| a.id == *auth_type_id)
            .cloned())
    }

    async fn load_grants(&mut self) -> Result<Vec<PolicyGrant>, ServiceError> {
        Ok(self.working.grants.clone())
    }

    async fn insert_grant(&mut self, grant: &PolicyGrant) -> Result<bool, ServiceError> {
        if self.working.grants.contains(grant) {
            return Ok(false);
        }
        self.working.grants.push(grant.clone());
        Ok(true)
    }

    async fn find_token_pair(
        &mut self,
        user_id: i64,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, ServiceError> {
        Ok(self
            .working
            .token_pairs
            .iter()
            .find(|p| p.users_id == user_id && p.refresh_token == refresh_token)
            .cloned())
    }

    async fn find_token_pair_for_user(
        &mut self,
        user_id: i64,
    ) -> Result<Option<TokenPair>, ServiceError> {
        Ok(self
            .working
            .token_pairs
            .iter()
            .find(|p| p.users_id == user_id)
            .cloned())
    }

    async fn insert_token_pair(
        &mut self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<TokenPair, ServiceError> {
        let state = &mut self.working;
        if state.token_pairs.iter().any(|p| p.users_id == user_id) {
            return Err(conflict("token pair"));
        }
        let pair = TokenPair {
            id: state.next_id(),
            users_id: user_id,
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
        };
        state.token_pairs.push(pair.clone());
        Ok(pair)
    }

    async fn update_token_pair(
        &mut self,
        pair_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), ServiceError> {
        if let Some(pair) = self.working.token_pairs.iter_mut().find(|p| p.id == pair_id) {
            pair.access_token = access_token.to_string();
            if let Some(refresh_token) = refresh_token {
                pair.refresh_token = refresh_token.to_string();
            }
        }
        Ok(())
    }

    async fn delete_token_pairs_for_user(&mut self, user_id: i64) -> Result<u64, ServiceError> {
        let before = self.working.token_pairs.len();
        self.working.token_pairs.retain(|p| p.users_id != user_id);
        Ok((before - self.working.token_pairs.len()) as u64)
    }

    async fn delete_token_pair(
        &mut self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, ServiceError> {
        let before = self.working.token_pairs.len();
        self.working.token_pairs.retain(|p| {
            !(p.users_id == user_id
                && p.access_token == access_token
                && p.refresh_token == refresh_token)
        });
        Ok(before != self.working.token_pairs.len())
    }

    async fn find_reset_token(
        &mut self,
        token: &str,
    ) -> Result<Option<ResetToken>, ServiceError> {
        Ok(self
            .working
            .reset_tokens
            .iter()
            .find(|r| r.token == token)
            .cloned())
    }

    async fn find_reset_token_for_user(
        &mut self,
        user_id: i64,
    ) -> Result<Option<ResetToken>, ServiceError> {
        Ok(self
            .working
            .reset_tokens
            .iter()
            .find(|r| r.users_id == user_id)
            .cloned())
    }

    async fn insert_reset_token(
        &mut self,
        user_id: i64,
        token: &str,
    ) -> Result<ResetToken, ServiceError> {
        let state = &mut self.working;
        if state
            .reset_tokens
            .iter()
            .any(|r| r.users_id == user_id || r.token == token)
        {
            return Err(conflict("reset token"));
        }
        let row = ResetToken {
            id: state.next_id(),
            users_id: user_id,
            token: token.to_string(),
        };
        state.reset_tokens.push(row.clone());
        Ok(row)
    }

    async fn delete_reset_tokens_for_user(&mut self, user_id: i64) -> Result<u64, ServiceError> {
        let before = self.working.reset_tokens.len();
        self.working.reset_tokens.retain(|r| r.users_id != user_id);
        Ok((before - self.working.reset_tokens.len()) as u64)
    }

    async fn insert_activation(
        &mut self,
        user_id: i64,
        link: Uuid,
        is_activated: bool,
    ) -> Result<Activation, ServiceError> {
        let state = &mut self.working;
        if state.activations.iter().any(|a| a.link == link) {
            return Err(conflict("activation link"));
        }
        let row = Activation {
            id: state.next_id(),
            users_id: user_id,
            link,
            is_activated,
        };
        state.activations.push(row.clone());
        Ok(row)
    }

    async fn find_activation(&mut self, link: Uuid) -> Result<Option<Activation>, ServiceError> {
        Ok(self
            .working
            .activations
            .iter()
            .find(|a| a.link == link)
            .cloned())
    }

    async fn find_activation_for_user(
        &mut self,
        user_id: i64,
    ) -> Result<Option<Activation>, ServiceError> {
        Ok(self
            .working
            .activations
            .iter()
            .find(|a| a.users_id == user_id)
            .cloned())
    }

    async fn mark_activated(&mut self, activation_id: i64) -> Result<(), ServiceError> {
        if let Some(activation) = self
            .working
            .activations
            .iter_mut()
            .find(|a| a.id == activation_id)
        {
            activation.is_activated = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = MemoryStore::new();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_user(&NewUser::new("a@x.com", "hash")).await.unwrap();
        }
        assert_eq!(store.table_sizes().await.users, 0);

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&NewUser::new("a@x.com", "hash")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.table_sizes().await.users, 1);
    }

    #[tokio::test]
    async fn test_role_lookup_prefers_domain_role() {
        let store = MemoryStore::new();
        let domain = store.seed_domain("crm", "CRM").await;
        let global = store.seed_role("client", "Global client", None).await;
        let scoped = store.seed_role("client", "CRM client", Some(domain.id)).await;

        let mut tx = store.begin().await.unwrap();
        let found = tx
            .find_role(&RoleLookup::Value {
                value: "client".to_string(),
                domain_id: domain.id,
            })
            .await
            .unwrap();
        assert_eq!(found, Some(scoped));

        let fallback = tx
            .find_role(&RoleLookup::Value {
                value: "client".to_string(),
                domain_id: domain.id + 100,
            })
            .await
            .unwrap();
        assert_eq!(fallback, Some(global));
    }

    #[tokio::test]
    async fn test_one_token_pair_per_user() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let user = tx.insert_user(&NewUser::new("a@x.com", "hash")).await.unwrap();

        tx.insert_token_pair(user.id, "a1", "r1").await.unwrap();
        let second = tx.insert_token_pair(user.id, "a2", "r2").await;
        assert!(matches!(second, Err(ServiceError::Conflict(_))));
    }
}
