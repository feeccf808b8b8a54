//! Persistence seam.
//!
//! Every operation runs inside a [`Transaction`] obtained from [`Store::begin`].
//! Committing applies all writes at once; dropping an uncommitted transaction
//! discards them. Read-only callers simply drop the transaction when done.

mod memory;
mod postgres;

pub use memory::{MemoryStore, TableSizes};
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Activation, AuthKind, AuthType, Domain, NewUser, PolicyGrant, ResetToken, Role, TokenPair,
    User, UserProfile,
};
use crate::services::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Id(i64),
    Uuid(Uuid),
    Email(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainLookup {
    Id(i64),
    Uuid(Uuid),
    Value(String),
}

/// `Value` matches a role of the given domain first, then a global role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleLookup {
    Id(i64),
    Uuid(Uuid),
    Value { value: String, domain_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthTypeLookup {
    Id(i64),
    Uuid(Uuid),
    Kind(AuthKind),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;

    // Users
    async fn find_user(&mut self, lookup: &UserLookup) -> Result<Option<User>, ServiceError>;
    async fn insert_user(&mut self, user: &NewUser) -> Result<User, ServiceError>;
    async fn update_password_hash(
        &mut self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<(), ServiceError>;
    async fn insert_profile(
        &mut self,
        user_id: i64,
        profile: &UserProfile,
    ) -> Result<(), ServiceError>;
    async fn find_profile(&mut self, user_id: i64) -> Result<Option<UserProfile>, ServiceError>;
    /// Insert or replace the user's profile.
    async fn upsert_profile(
        &mut self,
        user_id: i64,
        profile: &UserProfile,
    ) -> Result<(), ServiceError>;

    // Domains, roles and auth types
    async fn find_domain(&mut self, lookup: &DomainLookup) -> Result<Option<Domain>, ServiceError>;
    async fn find_role(&mut self, lookup: &RoleLookup) -> Result<Option<Role>, ServiceError>;
    async fn find_auth_type(
        &mut self,
        lookup: &AuthTypeLookup,
    ) -> Result<Option<AuthType>, ServiceError>;
    async fn link_auth_type(&mut self, user_id: i64, auth_type_id: i64)
        -> Result<(), ServiceError>;
    async fn find_user_auth_type(&mut self, user_id: i64)
        -> Result<Option<AuthType>, ServiceError>;

    // Policy grants
    async fn load_grants(&mut self) -> Result<Vec<PolicyGrant>, ServiceError>;
    /// Returns `false` when the grant already existed.
    async fn insert_grant(&mut self, grant: &PolicyGrant) -> Result<bool, ServiceError>;

    // Token pairs
    async fn find_token_pair(
        &mut self,
        user_id: i64,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, ServiceError>;
    async fn find_token_pair_for_user(
        &mut self,
        user_id: i64,
    ) -> Result<Option<TokenPair>, ServiceError>;
    async fn insert_token_pair(
        &mut self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<TokenPair, ServiceError>;
    /// Overwrite the access token and, when given, the refresh token.
    async fn update_token_pair(
        &mut self,
        pair_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), ServiceError>;
    async fn delete_token_pairs_for_user(&mut self, user_id: i64) -> Result<u64, ServiceError>;
    /// Delete the pair matching all three values exactly; `false` if none did.
    async fn delete_token_pair(
        &mut self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, ServiceError>;

    // Reset tokens
    async fn find_reset_token(&mut self, token: &str)
        -> Result<Option<ResetToken>, ServiceError>;
    async fn find_reset_token_for_user(
        &mut self,
        user_id: i64,
    ) -> Result<Option<ResetToken>, ServiceError>;
    async fn insert_reset_token(
        &mut self,
        user_id: i64,
        token: &str,
    ) -> Result<ResetToken, ServiceError>;
    async fn delete_reset_tokens_for_user(&mut self, user_id: i64) -> Result<u64, ServiceError>;

    // Activation records
    async fn insert_activation(
        &mut self,
        user_id: i64,
        link: Uuid,
        is_activated: bool,
    ) -> Result<Activation, ServiceError>;
    async fn find_activation(&mut self, link: Uuid) -> Result<Option<Activation>, ServiceError>;
    async fn find_activation_for_user(
        &mut self,
        user_id: i64,
    ) -> Result<Option<Activation>, ServiceError>;
    async fn mark_activated(&mut self, activation_id: i64) -> Result<(), ServiceError>;
}
