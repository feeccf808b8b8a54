//! PostgreSQL store backed by sqlx transactions.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, Postgres};
use uuid::Uuid;

use super::{AuthTypeLookup, DomainLookup, RoleLookup, Store, Transaction, UserLookup};
use crate::models::{
    Activation, AuthType, Domain, NewUser, PolicyGrant, ResetToken, Role, TokenPair, User,
    UserProfile,
};
use crate::services::ServiceError;

const USER_COLUMNS: &str = "id, uuid, email, password_hash, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Unique violations surface as conflicts; everything else is infrastructure.
fn db_error(err: sqlx::Error) -> ServiceError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return ServiceError::Conflict(db_err.message().to_string());
        }
    }
    ServiceError::Database(err)
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, ServiceError> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        crate::db::health_check(&self.pool).await.map_err(db_error)
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.tx.commit().await.map_err(db_error)
    }

    // ==================== Users ====================

    async fn find_user(&mut self, lookup: &UserLookup) -> Result<Option<User>, ServiceError> {
        let query = match lookup {
            UserLookup::Id(id) => {
                sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                    .bind(*id)
                    .fetch_optional(&mut *self.tx)
                    .await
            }
            UserLookup::Uuid(uuid) => {
                sqlx::query_as::<_, User>(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE uuid = $1"
                ))
                .bind(*uuid)
                .fetch_optional(&mut *self.tx)
                .await
            }
            UserLookup::Email(email) => {
                sqlx::query_as::<_, User>(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
                ))
                .bind(email)
                .fetch_optional(&mut *self.tx)
                .await
            }
        };
        query.map_err(db_error)
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<User, ServiceError> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (uuid, email, password_hash) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        ))
        .bind(user.uuid)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn update_password_hash(
        &mut self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<(), ServiceError> {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn insert_profile(
        &mut self,
        user_id: i64,
        profile: &UserProfile,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO users_data (users_id, name, surname, phone)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(&profile.name)
        .bind(&profile.surname)
        .bind(&profile.phone)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_profile(&mut self, user_id: i64) -> Result<Option<UserProfile>, ServiceError> {
        sqlx::query_as::<_, UserProfile>(
            "SELECT name, surname, phone FROM users_data WHERE users_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn upsert_profile(
        &mut self,
        user_id: i64,
        profile: &UserProfile,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO users_data (users_id, name, surname, phone)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (users_id)
            DO UPDATE SET name = EXCLUDED.name, surname = EXCLUDED.surname, phone = EXCLUDED.phone
            "#,
        )
        .bind(user_id)
        .bind(&profile.name)
        .bind(&profile.surname)
        .bind(&profile.phone)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    // ==================== Domains, roles, auth types ====================

    async fn find_domain(&mut self, lookup: &DomainLookup) -> Result<Option<Domain>, ServiceError> {
        let base = "SELECT id, uuid, value, name FROM domains";
        let result = match lookup {
            DomainLookup::Id(id) => {
                sqlx::query_as::<_, Domain>(&format!("{base} WHERE id = $1"))
                    .bind(*id)
                    .fetch_optional(&mut *self.tx)
                    .await
            }
            DomainLookup::Uuid(uuid) => {
                sqlx::query_as::<_, Domain>(&format!("{base} WHERE uuid = $1"))
                    .bind(*uuid)
                    .fetch_optional(&mut *self.tx)
                    .await
            }
            DomainLookup::Value(value) => {
                sqlx::query_as::<_, Domain>(&format!("{base} WHERE value = $1"))
                    .bind(value)
                    .fetch_optional(&mut *self.tx)
                    .await
            }
        };
        result.map_err(db_error)
    }

    async fn find_role(&mut self, lookup: &RoleLookup) -> Result<Option<Role>, ServiceError> {
        let base = "SELECT id, uuid, value, name, domains_id, users_id FROM roles";
        let result = match lookup {
            RoleLookup::Id(id) => {
                sqlx::query_as::<_, Role>(&format!("{base} WHERE id = $1"))
                    .bind(*id)
                    .fetch_optional(&mut *self.tx)
                    .await
            }
            RoleLookup::Uuid(uuid) => {
                sqlx::query_as::<_, Role>(&format!("{base} WHERE uuid = $1"))
                    .bind(*uuid)
                    .fetch_optional(&mut *self.tx)
                    .await
            }
            RoleLookup::Value { value, domain_id } => {
                sqlx::query_as::<_, Role>(&format!(
                    r#"
                    {base}
                    WHERE value = $1 AND (domains_id = $2 OR domains_id IS NULL)
                    ORDER BY domains_id NULLS LAST
                    LIMIT 1
                    "#
                ))
                .bind(value)
                .bind(*domain_id)
                .fetch_optional(&mut *self.tx)
                .await
            }
        };
        result.map_err(db_error)
    }

    async fn find_auth_type(
        &mut self,
        lookup: &AuthTypeLookup,
    ) -> Result<Option<AuthType>, ServiceError> {
        let base = "SELECT id, uuid, value FROM auth_types";
        let result = match lookup {
            AuthTypeLookup::Id(id) => {
                sqlx::query_as::<_, AuthType>(&format!("{base} WHERE id = $1"))
                    .bind(*id)
                    .fetch_optional(&mut *self.tx)
                    .await
            }
            AuthTypeLookup::Uuid(uuid) => {
                sqlx::query_as::<_, AuthType>(&format!("{base} WHERE uuid = $1"))
                    .bind(*uuid)
                    .fetch_optional(&mut *self.tx)
                    .await
            }
            AuthTypeLookup::Kind(kind) => {
                sqlx::query_as::<_, AuthType>(&format!("{base} WHERE value = $1"))
                    .bind(kind.as_str())
                    .fetch_optional(&mut *self.tx)
                    .await
            }
        };
        result.map_err(db_error)
    }

    async fn link_auth_type(
        &mut self,
        user_id: i64,
        auth_type_id: i64,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO users_auth_types (users_id, auth_types_id)
            VALUES ($1, $2)
            ON CONFLICT (users_id) DO UPDATE SET auth_types_id = EXCLUDED.auth_types_id
            "#,
        )
        .bind(user_id)
        .bind(auth_type_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_user_auth_type(
        &mut self,
        user_id: i64,
    ) -> Result<Option<AuthType>, ServiceError> {
        sqlx::query_as::<_, AuthType>(
            r#"
            SELECT at.id, at.uuid, at.value
            FROM auth_types at
            JOIN users_auth_types uat ON uat.auth_types_id = at.id
            WHERE uat.users_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    // ==================== Policy grants ====================

    async fn load_grants(&mut self) -> Result<Vec<PolicyGrant>, ServiceError> {
        sqlx::query_as::<_, PolicyGrant>("SELECT v0, v1, v2 FROM policy_grants WHERE ptype = 'g'")
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)
    }

    async fn insert_grant(&mut self, grant: &PolicyGrant) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO policy_grants (ptype, v0, v1, v2)
            VALUES ('g', $1, $2, $3)
            ON CONFLICT (ptype, v0, v1, v2) DO NOTHING
            "#,
        )
        .bind(&grant.subject)
        .bind(&grant.role)
        .bind(&grant.domain)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    // ==================== Token pairs ====================

    async fn find_token_pair(
        &mut self,
        user_id: i64,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, ServiceError> {
        sqlx::query_as::<_, TokenPair>(
            r#"
            SELECT id, users_id, access_token, refresh_token
            FROM tokens
            WHERE users_id = $1 AND refresh_token = $2
            "#,
        )
        .bind(user_id)
        .bind(refresh_token)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn find_token_pair_for_user(
        &mut self,
        user_id: i64,
    ) -> Result<Option<TokenPair>, ServiceError> {
        sqlx::query_as::<_, TokenPair>(
            "SELECT id, users_id, access_token, refresh_token FROM tokens WHERE users_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn insert_token_pair(
        &mut self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<TokenPair, ServiceError> {
        sqlx::query_as::<_, TokenPair>(
            r#"
            INSERT INTO tokens (users_id, access_token, refresh_token)
            VALUES ($1, $2, $3)
            RETURNING id, users_id, access_token, refresh_token
            "#,
        )
        .bind(user_id)
        .bind(access_token)
        .bind(refresh_token)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn update_token_pair(
        &mut self,
        pair_id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), ServiceError> {
        let query = match refresh_token {
            Some(refresh_token) => {
                sqlx::query("UPDATE tokens SET access_token = $1, refresh_token = $2 WHERE id = $3")
                    .bind(access_token)
                    .bind(refresh_token)
                    .bind(pair_id)
            }
            None => sqlx::query("UPDATE tokens SET access_token = $1 WHERE id = $2")
                .bind(access_token)
                .bind(pair_id),
        };
        query.execute(&mut *self.tx).await.map_err(db_error)?;
        Ok(())
    }

    async fn delete_token_pairs_for_user(&mut self, user_id: i64) -> Result<u64, ServiceError> {
        let result = sqlx::query("DELETE FROM tokens WHERE users_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_token_pair(
        &mut self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, ServiceError> {
        let deleted: Option<i64> = sqlx::query_scalar(
            r#"
            DELETE FROM tokens
            WHERE users_id = $1 AND access_token = $2 AND refresh_token = $3
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(access_token)
        .bind(refresh_token)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(deleted.is_some())
    }

    // ==================== Reset tokens ====================

    async fn find_reset_token(
        &mut self,
        token: &str,
    ) -> Result<Option<ResetToken>, ServiceError> {
        sqlx::query_as::<_, ResetToken>(
            "SELECT id, users_id, token FROM reset_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn find_reset_token_for_user(
        &mut self,
        user_id: i64,
    ) -> Result<Option<ResetToken>, ServiceError> {
        sqlx::query_as::<_, ResetToken>(
            "SELECT id, users_id, token FROM reset_tokens WHERE users_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn insert_reset_token(
        &mut self,
        user_id: i64,
        token: &str,
    ) -> Result<ResetToken, ServiceError> {
        sqlx::query_as::<_, ResetToken>(
            "INSERT INTO reset_tokens (users_id, token) VALUES ($1, $2) RETURNING id, users_id, token",
        )
        .bind(user_id)
        .bind(token)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn delete_reset_tokens_for_user(&mut self, user_id: i64) -> Result<u64, ServiceError> {
        let result = sqlx::query("DELETE FROM reset_tokens WHERE users_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    // ==================== Activation records ====================

    async fn insert_activation(
        &mut self,
        user_id: i64,
        link: Uuid,
        is_activated: bool,
    ) -> Result<Activation, ServiceError> {
        sqlx::query_as::<_, Activation>(
            r#"
            INSERT INTO activations (users_id, link, is_activated)
            VALUES ($1, $2, $3)
            RETURNING id, users_id, link, is_activated
            "#,
        )
        .bind(user_id)
        .bind(link)
        .bind(is_activated)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn find_activation(&mut self, link: Uuid) -> Result<Option<Activation>, ServiceError> {
        sqlx::query_as::<_, Activation>(
            "SELECT id, users_id, link, is_activated FROM activations WHERE link = $1",
        )
        .bind(link)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn find_activation_for_user(
        &mut self,
        user_id: i64,
    ) -> Result<Option<Activation>, ServiceError> {
        sqlx::query_as::<_, Activation>(
            "SELECT id, users_id, link, is_activated FROM activations WHERE users_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn mark_activated(&mut self, activation_id: i64) -> Result<(), ServiceError> {
        sqlx::query("UPDATE activations SET is_activated = TRUE WHERE id = $1")
            .bind(activation_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}
