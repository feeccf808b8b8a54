//! Registration, activation and password recovery.

use std::sync::Arc;
use uuid::Uuid;

use crate::config::{LinkConfig, PasswordConfig, RbacConfig};
use crate::models::{AuthKind, GrantedRole, NewUser, User, UserProfile};
use crate::services::metrics::{record_auth_event, Outcome};
use crate::services::session::{find_auth_type, find_scope_domain};
use crate::services::{EmailProvider, Enforcer, ServiceError, SessionTokens, TokenCodec};
use crate::store::{RoleLookup, Store, Transaction, UserLookup};
use crate::utils::{hash_password, Password};

#[derive(Debug, Clone)]
pub struct SignUpInput {
    pub email: String,
    pub password: Password,
    pub profile: UserProfile,
}

/// Everything needed to create a user with its first session.
pub(crate) struct Provisioning<'a> {
    pub email: &'a str,
    pub password_hash: String,
    pub profile: UserProfile,
    pub auth_kind: AuthKind,
    pub access_token_api: Option<&'a str>,
    pub refresh_token_api: Option<&'a str>,
}

/// Insert user, profile, default grant, auth type link and token pair inside
/// the caller's transaction.
pub(crate) async fn provision_user(
    tx: &mut dyn Transaction,
    enforcer: &Enforcer,
    codec: &TokenCodec,
    rbac: &RbacConfig,
    new: Provisioning<'_>,
) -> Result<(User, SessionTokens), ServiceError> {
    if tx
        .find_user(&UserLookup::Email(new.email.to_string()))
        .await?
        .is_some()
    {
        return Err(ServiceError::Conflict(
            "email is already registered".to_string(),
        ));
    }

    let domain = find_scope_domain(tx, &rbac.domain).await?;
    let role = tx
        .find_role(&RoleLookup::Value {
            value: rbac.default_role.clone(),
            domain_id: domain.id,
        })
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("role '{}' does not exist", rbac.default_role))
        })?;

    let user = tx
        .insert_user(&NewUser::new(new.email, new.password_hash))
        .await?;
    tx.insert_profile(user.id, &new.profile).await?;
    enforcer
        .add_role_for_user_in_domain(tx, user.id, &GrantedRole::Role(role.id), domain.id)
        .await?;

    let auth_type = find_auth_type(tx, new.auth_kind).await?;
    tx.link_auth_type(user.id, auth_type.id).await?;

    let tokens = codec.issue_pair(
        user.uuid,
        auth_type.uuid,
        new.access_token_api,
        new.refresh_token_api,
    )?;
    tx.insert_token_pair(user.id, &tokens.access_token, &tokens.refresh_token)
        .await?;

    Ok((user, tokens))
}

#[derive(Clone)]
pub struct CredentialManager {
    store: Arc<dyn Store>,
    enforcer: Enforcer,
    codec: TokenCodec,
    email: Arc<dyn EmailProvider>,
    rbac: RbacConfig,
    password: PasswordConfig,
    links: LinkConfig,
}

impl CredentialManager {
    pub fn new(
        store: Arc<dyn Store>,
        enforcer: Enforcer,
        codec: TokenCodec,
        email: Arc<dyn EmailProvider>,
        rbac: RbacConfig,
        password: PasswordConfig,
        links: LinkConfig,
    ) -> Self {
        Self {
            store,
            enforcer,
            codec,
            email,
            rbac,
            password,
            links,
        }
    }

    fn hash(&self, password: &Password) -> Result<String, ServiceError> {
        hash_password(password, self.password.hash_cost)
            .map(|hash| hash.into_string())
            .map_err(ServiceError::Internal)
    }

    /// Register a local account and open its first session.
    ///
    /// The activation mail is sent before the commit; if it cannot be sent
    /// nothing is stored.
    pub async fn sign_up(&self, input: SignUpInput) -> Result<SessionTokens, ServiceError> {
        let result = self.register(input).await;
        record_auth_event("sign_up", Outcome::from(&result));
        result
    }

    async fn register(&self, input: SignUpInput) -> Result<SessionTokens, ServiceError> {
        let password_hash = self.hash(&input.password)?;

        let mut tx = self.store.begin().await?;
        let (user, tokens) = provision_user(
            tx.as_mut(),
            &self.enforcer,
            &self.codec,
            &self.rbac,
            Provisioning {
                email: &input.email,
                password_hash,
                profile: input.profile,
                auth_kind: AuthKind::Local,
                access_token_api: None,
                refresh_token_api: None,
            },
        )
        .await?;

        let activation = tx.insert_activation(user.id, Uuid::new_v4(), false).await?;
        let activation_link = format!(
            "{}/auth/activate/{}",
            self.links.api_url.trim_end_matches('/'),
            activation.link
        );
        self.email
            .send_activation_email(&user.email, &activation_link)
            .await?;

        tx.commit().await?;

        tracing::info!(user_id = user.id, user_uuid = %user.uuid, "User signed up");
        Ok(tokens)
    }

    /// Mark the activation record behind `link` as used. Activating twice succeeds.
    pub async fn activate(&self, link: &str) -> Result<bool, ServiceError> {
        let link = Uuid::parse_str(link)
            .map_err(|_| ServiceError::Validation("activation link is malformed".to_string()))?;

        let mut tx = self.store.begin().await?;
        let activation = tx
            .find_activation(link)
            .await?
            .ok_or_else(|| ServiceError::not_found("activation link"))?;

        if activation.is_activated {
            tracing::debug!(user_id = activation.users_id, "Account already activated");
            return Ok(true);
        }

        tx.mark_activated(activation.id).await?;
        tx.commit().await?;

        tracing::info!(user_id = activation.users_id, "Account activated");
        Ok(true)
    }

    /// Issue a reset token for a local account and mail the reset link.
    pub async fn recovery_password(&self, email: &str) -> Result<(), ServiceError> {
        let result = self.start_recovery(email).await;
        record_auth_event("recovery", Outcome::from(&result));
        result
    }

    async fn start_recovery(&self, email: &str) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await?;
        let user = tx
            .find_user(&UserLookup::Email(email.to_string()))
            .await?
            .ok_or_else(|| ServiceError::not_found("user"))?;

        let auth_type = tx
            .find_user_auth_type(user.id)
            .await?
            .ok_or_else(|| ServiceError::not_found("auth type link"))?;
        if auth_type.kind() != Some(AuthKind::Local) {
            tracing::warn!(user_id = user.id, auth_type = %auth_type.value, "Recovery refused for federated account");
            return Err(ServiceError::Validation(format!(
                "password recovery is only available for password accounts; this account signs in with {}",
                auth_type.value
            )));
        }

        tx.delete_reset_tokens_for_user(user.id).await?;
        let token = self.codec.issue_reset(user.uuid, &user.email)?;
        tx.insert_reset_token(user.id, &token).await?;

        let reset_link = format!(
            "{}/auth/reset/password/{}",
            self.links.client_url.trim_end_matches('/'),
            token
        );
        self.email
            .send_password_reset_email(&user.email, &reset_link)
            .await?;

        tx.commit().await?;

        tracing::info!(user_id = user.id, "Password recovery started");
        Ok(())
    }

    /// Consume a reset token and set a new password.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &Password,
    ) -> Result<(), ServiceError> {
        let result = self.apply_reset(token, new_password).await;
        record_auth_event("reset", Outcome::from(&result));
        result
    }

    async fn apply_reset(&self, token: &str, new_password: &Password) -> Result<(), ServiceError> {
        let signer = self.codec.parse_reset(token).await?;
        let password_hash = self.hash(new_password)?;

        let mut tx = self.store.begin().await?;
        let stored = tx
            .find_reset_token(token)
            .await?
            .ok_or_else(|| ServiceError::not_found("reset token"))?;

        if stored.users_id != signer.user.id {
            tracing::warn!(
                token_owner = stored.users_id,
                signer = signer.user.id,
                "Reset token owner does not match its signed subject"
            );
            return Err(ServiceError::Authentication(
                "reset token does not belong to its subject".to_string(),
            ));
        }

        tx.update_password_hash(signer.user.id, &password_hash)
            .await?;
        tx.delete_reset_tokens_for_user(signer.user.id).await?;
        tx.commit().await?;

        tracing::info!(user_id = signer.user.id, "Password reset");
        Ok(())
    }
}
