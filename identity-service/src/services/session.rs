//! Login, refresh and logout.
//!
//! A user has at most one stored token pair. Login replaces it, refresh
//! rewrites it in place, logout deletes it. Deleting the row is what revokes
//! a session; token expiry alone is not relied on.

use std::sync::Arc;
use uuid::Uuid;

use crate::config::RbacConfig;
use crate::models::{AuthKind, AuthType, Domain, User, UserProfile};
use crate::services::credentials::{provision_user, Provisioning};
use crate::services::metrics::{record_auth_event, Outcome};
use crate::services::{
    Enforcer, OAuthProvider, ServiceError, SessionSubject, SessionTokenKind, SessionTokens,
    TokenCodec,
};
use crate::store::{AuthTypeLookup, DomainLookup, RoleLookup, Store, Transaction, UserLookup};
use crate::utils::{verify_password, Password, PasswordHashString};

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    enforcer: Enforcer,
    codec: TokenCodec,
    oauth: Arc<dyn OAuthProvider>,
    rbac: RbacConfig,
}

pub(crate) async fn find_scope_domain(
    tx: &mut dyn Transaction,
    value: &str,
) -> Result<Domain, ServiceError> {
    tx.find_domain(&DomainLookup::Value(value.to_string()))
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("domain '{}' does not exist", value)))
}

pub(crate) async fn find_auth_type(
    tx: &mut dyn Transaction,
    kind: AuthKind,
) -> Result<AuthType, ServiceError> {
    tx.find_auth_type(&AuthTypeLookup::Kind(kind))
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("auth type {} does not exist", kind)))
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        enforcer: Enforcer,
        codec: TokenCodec,
        oauth: Arc<dyn OAuthProvider>,
        rbac: RbacConfig,
    ) -> Self {
        Self {
            store,
            enforcer,
            codec,
            oauth,
            rbac,
        }
    }

    /// The domain every session of this service is scoped to.
    pub async fn scope_domain(&self) -> Result<Domain, ServiceError> {
        let mut tx = self.store.begin().await?;
        find_scope_domain(tx.as_mut(), &self.rbac.domain).await
    }

    /// Startup check that the configured domain and roles exist and every
    /// stored grant decodes. Returns the number of grants.
    pub async fn check_rbac_model(&self) -> Result<usize, ServiceError> {
        {
            let mut tx = self.store.begin().await?;
            let domain = find_scope_domain(tx.as_mut(), &self.rbac.domain).await?;
            for role in [&self.rbac.default_role, &self.rbac.admin_role] {
                tx.find_role(&RoleLookup::Value {
                    value: role.clone(),
                    domain_id: domain.id,
                })
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("role '{}' does not exist", role)))?;
            }
        }
        self.enforcer.load_policy().await
    }

    /// Fails with `Authorization` unless the user holds the default role in
    /// the configured domain.
    async fn ensure_domain_member(
        &self,
        tx: &mut dyn Transaction,
        user: &User,
    ) -> Result<(), ServiceError> {
        let domain = find_scope_domain(tx, &self.rbac.domain).await?;
        if !self
            .enforcer
            .has_role_in(tx, user.id, domain.id, &self.rbac.default_role)
            .await?
        {
            tracing::warn!(user_id = user.id, domain = %domain.value, "User has no access to domain");
            return Err(ServiceError::Authorization(
                "user has no access to this domain".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn login(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<SessionTokens, ServiceError> {
        let result = self.login_local(email, password).await;
        record_auth_event("login", Outcome::from(&result));
        result
    }

    async fn login_local(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<SessionTokens, ServiceError> {
        let mut tx = self.store.begin().await?;

        let user = tx
            .find_user(&UserLookup::Email(email.to_string()))
            .await?
            .ok_or_else(|| ServiceError::not_found("user"))?;

        if verify_password(password, &PasswordHashString::new(user.password_hash.clone())).is_err()
        {
            tracing::warn!(user_id = user.id, "Login rejected: invalid password");
            return Err(ServiceError::Authentication(
                "invalid email or password".to_string(),
            ));
        }

        tx.delete_token_pairs_for_user(user.id).await?;
        self.ensure_domain_member(tx.as_mut(), &user).await?;

        let local = find_auth_type(tx.as_mut(), AuthKind::Local).await?;
        let tokens = self.codec.issue_pair(user.uuid, local.uuid, None, None)?;
        tx.insert_token_pair(user.id, &tokens.access_token, &tokens.refresh_token)
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = user.id, user_uuid = %user.uuid, "User logged in");
        Ok(tokens)
    }

    /// Sign in with a provider authorization code, registering the user on
    /// first contact.
    pub async fn login_oauth2(&self, code: &str) -> Result<SessionTokens, ServiceError> {
        let result = self.login_federated(code).await;
        record_auth_event("login_oauth2", Outcome::from(&result));
        result
    }

    async fn login_federated(&self, code: &str) -> Result<SessionTokens, ServiceError> {
        let provider = self.oauth.exchange_code(code).await?;
        if !self.oauth.verify_access_token(&provider.access_token).await? {
            return Err(ServiceError::Authentication(
                "identity provider did not confirm the access token".to_string(),
            ));
        }
        let profile = self.oauth.fetch_profile(&provider.access_token).await?;

        let mut tx = self.store.begin().await?;
        let existing = tx
            .find_user(&UserLookup::Email(profile.email.clone()))
            .await?;

        let (user, tokens) = match existing {
            None => {
                let (user, tokens) = provision_user(
                    tx.as_mut(),
                    &self.enforcer,
                    &self.codec,
                    &self.rbac,
                    Provisioning {
                        email: &profile.email,
                        password_hash: provider.access_token.clone(),
                        profile: UserProfile {
                            name: profile.given_name.clone(),
                            surname: profile.family_name.clone(),
                            phone: None,
                        },
                        auth_kind: AuthKind::Google,
                        access_token_api: Some(&provider.access_token),
                        refresh_token_api: provider.refresh_token.as_deref(),
                    },
                )
                .await?;
                // The provider has already confirmed the address.
                tx.insert_activation(user.id, Uuid::new_v4(), true).await?;
                tracing::info!(user_id = user.id, "User registered through identity provider");
                (user, tokens)
            }
            Some(user) => {
                tx.update_password_hash(user.id, &provider.access_token)
                    .await?;
                tx.delete_token_pairs_for_user(user.id).await?;
                self.ensure_domain_member(tx.as_mut(), &user).await?;

                let google = find_auth_type(tx.as_mut(), AuthKind::Google).await?;
                tx.link_auth_type(user.id, google.id).await?;

                let tokens = self.codec.issue_pair(
                    user.uuid,
                    google.uuid,
                    Some(&provider.access_token),
                    provider.refresh_token.as_deref(),
                )?;
                tx.insert_token_pair(user.id, &tokens.access_token, &tokens.refresh_token)
                    .await?;
                (user, tokens)
            }
        };

        tx.commit().await?;
        tracing::info!(user_id = user.id, user_uuid = %user.uuid, "User logged in through identity provider");
        Ok(tokens)
    }

    /// Exchange the stored refresh token for a new access token. The refresh
    /// token itself is only replaced once its own signature has expired.
    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionTokens, ServiceError> {
        let result = self.refresh_pair(refresh_token).await;
        record_auth_event("refresh", Outcome::from(&result));
        result
    }

    async fn refresh_pair(&self, refresh_token: &str) -> Result<SessionTokens, ServiceError> {
        let subject = self
            .codec
            .parse_unvalidated(refresh_token, SessionTokenKind::Refresh)
            .await?;
        let user = &subject.user;

        let mut tx = self.store.begin().await?;
        let pair = tx
            .find_token_pair(user.id, refresh_token)
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = user.id, "Refresh token does not match the stored session");
                ServiceError::Authentication(
                    "refresh token does not match the active session".to_string(),
                )
            })?;
        self.ensure_domain_member(tx.as_mut(), user).await?;

        let rotate = !self
            .codec
            .is_signature_valid(refresh_token, SessionTokenKind::Refresh);
        let auth_type_uuid = subject.auth_type.uuid;

        let (access_token, new_refresh) = match subject.auth_kind {
            AuthKind::Local => {
                let new_refresh = if rotate {
                    Some(self.codec.issue_session(
                        SessionTokenKind::Refresh,
                        user.uuid,
                        auth_type_uuid,
                        None,
                    )?)
                } else {
                    None
                };
                let access = self.codec.issue_session(
                    SessionTokenKind::Access,
                    user.uuid,
                    auth_type_uuid,
                    None,
                )?;
                (access, new_refresh)
            }
            AuthKind::Google => {
                let provider_refresh = subject.token_api.clone().ok_or_else(|| {
                    ServiceError::Authentication(
                        "federated session carries no provider refresh token".to_string(),
                    )
                })?;
                let provider = self.oauth.refresh_access_token(&provider_refresh).await?;
                // A new provider refresh token must reach the stored session
                // even while ours is still valid.
                let provider_rotated = provider
                    .refresh_token
                    .as_deref()
                    .is_some_and(|issued| issued != provider_refresh);
                let provider_refresh = provider.refresh_token.unwrap_or(provider_refresh);

                let new_refresh = if rotate || provider_rotated {
                    Some(self.codec.issue_session(
                        SessionTokenKind::Refresh,
                        user.uuid,
                        auth_type_uuid,
                        Some(&provider_refresh),
                    )?)
                } else {
                    None
                };
                let access = self.codec.issue_session(
                    SessionTokenKind::Access,
                    user.uuid,
                    auth_type_uuid,
                    Some(&provider.access_token),
                )?;
                tx.update_password_hash(user.id, &provider.access_token)
                    .await?;
                (access, new_refresh)
            }
        };

        tx.update_token_pair(pair.id, &access_token, new_refresh.as_deref())
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = user.id, rotated = new_refresh.is_some(), "Session refreshed");
        Ok(SessionTokens {
            access_token,
            refresh_token: new_refresh.unwrap_or_else(|| refresh_token.to_string()),
        })
    }

    /// End the session identified by exactly this access/refresh pair.
    pub async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), ServiceError> {
        let result = self.logout_pair(access_token, refresh_token).await;
        record_auth_event("logout", Outcome::from(&result));
        result
    }

    async fn logout_pair(&self, access_token: &str, refresh_token: &str) -> Result<(), ServiceError> {
        let subject = self
            .codec
            .parse_unvalidated(access_token, SessionTokenKind::Access)
            .await?;

        let mut tx = self.store.begin().await?;
        let deleted = tx
            .delete_token_pair(subject.user.id, access_token, refresh_token)
            .await?;
        if !deleted {
            return Err(ServiceError::NotFound(
                "no active session matches the presented tokens".to_string(),
            ));
        }
        tx.commit().await?;

        if subject.auth_kind.is_federated() {
            if let Some(token) = &subject.token_api {
                if let Err(e) = self.oauth.revoke_token(token).await {
                    tracing::warn!(user_id = subject.user.id, error = %e, "Failed to revoke provider token");
                }
            }
        }

        tracing::info!(user_id = subject.user.id, "User logged out");
        Ok(())
    }

    /// Resolve a bearer access token to its session, re-checking federated
    /// sessions with the provider.
    pub async fn authenticate(&self, access_token: &str) -> Result<SessionSubject, ServiceError> {
        let subject = self
            .codec
            .parse_validated(access_token, SessionTokenKind::Access)
            .await?;
        self.verify_federated(&subject).await?;
        Ok(subject)
    }

    /// Like [`authenticate`](Self::authenticate) but accepts expired tokens.
    pub async fn authenticate_expired(
        &self,
        access_token: &str,
    ) -> Result<SessionSubject, ServiceError> {
        self.codec
            .parse_unvalidated(access_token, SessionTokenKind::Access)
            .await
    }

    async fn verify_federated(&self, subject: &SessionSubject) -> Result<(), ServiceError> {
        if !subject.auth_kind.is_federated() {
            return Ok(());
        }
        let token = subject.token_api.as_deref().ok_or_else(|| {
            ServiceError::Authentication("federated session carries no provider token".to_string())
        })?;
        if !self.oauth.verify_access_token(token).await? {
            tracing::warn!(user_id = subject.user.id, "Provider no longer confirms the session");
            return Err(ServiceError::Authentication(
                "identity provider rejected the session".to_string(),
            ));
        }
        Ok(())
    }
}
