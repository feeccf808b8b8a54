//! Session and reset token codec (HS256).
//!
//! Each token family has its own key and lifetime. Parsing a session token
//! does not stop at the signature: the embedded user and auth type are looked
//! up again, so removing either row revokes every token that names it.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{AuthKind, AuthType, User};
use crate::services::ServiceError;
use crate::store::{AuthTypeLookup, Store, UserLookup};

/// Claims carried by access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User uuid
    pub users_id: String,
    /// Auth type uuid
    pub auth_types_id: String,
    /// Provider token for federated sessions
    pub token_api: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetClaims {
    pub users_id: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTokenKind {
    Access,
    Refresh,
}

/// An access/refresh pair as handed to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Session identity recovered from a token and confirmed against the store.
#[derive(Debug, Clone)]
pub struct SessionSubject {
    pub user: User,
    pub auth_type: AuthType,
    pub auth_kind: AuthKind,
    pub token_api: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResetSubject {
    pub user: User,
    pub email: String,
}

struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKey {
    fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::minutes(ttl_minutes),
        }
    }
}

struct Keys {
    access: SigningKey,
    refresh: SigningKey,
    reset: SigningKey,
}

#[derive(Clone)]
pub struct TokenCodec {
    store: Arc<dyn Store>,
    keys: Arc<Keys>,
}

fn strict_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

fn token_error(err: jsonwebtoken::errors::Error) -> ServiceError {
    match err.kind() {
        JwtErrorKind::ExpiredSignature => {
            ServiceError::Authentication("token has expired".to_string())
        }
        _ => ServiceError::Authentication(format!("invalid token: {}", err)),
    }
}

impl TokenCodec {
    pub fn new(store: Arc<dyn Store>, config: &JwtConfig) -> Self {
        let keys = Keys {
            access: SigningKey::new(&config.access_secret, config.access_token_ttl_minutes),
            refresh: SigningKey::new(&config.refresh_secret, config.refresh_token_ttl_minutes),
            reset: SigningKey::new(&config.reset_secret, config.reset_token_ttl_minutes),
        };
        Self {
            store,
            keys: Arc::new(keys),
        }
    }

    fn session_key(&self, kind: SessionTokenKind) -> &SigningKey {
        match kind {
            SessionTokenKind::Access => &self.keys.access,
            SessionTokenKind::Refresh => &self.keys.refresh,
        }
    }

    fn sign<C: Serialize>(claims: &C, key: &SigningKey) -> Result<String, ServiceError> {
        encode(&Header::new(Algorithm::HS256), claims, &key.encoding)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to sign token: {}", e)))
    }

    fn decode_claims<C: DeserializeOwned>(
        token: &str,
        key: &SigningKey,
        validation: &Validation,
    ) -> Result<C, ServiceError> {
        decode::<C>(token, &key.decoding, validation)
            .map(|data| data.claims)
            .map_err(token_error)
    }

    pub fn issue_session(
        &self,
        kind: SessionTokenKind,
        user_uuid: Uuid,
        auth_type_uuid: Uuid,
        token_api: Option<&str>,
    ) -> Result<String, ServiceError> {
        let key = self.session_key(kind);
        let now = Utc::now();
        let claims = SessionClaims {
            users_id: user_uuid.to_string(),
            auth_types_id: auth_type_uuid.to_string(),
            token_api: token_api.map(str::to_string),
            iat: now.timestamp(),
            exp: (now + key.ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        Self::sign(&claims, key)
    }

    /// Issue a fresh access/refresh pair for one subject.
    pub fn issue_pair(
        &self,
        user_uuid: Uuid,
        auth_type_uuid: Uuid,
        access_token_api: Option<&str>,
        refresh_token_api: Option<&str>,
    ) -> Result<SessionTokens, ServiceError> {
        Ok(SessionTokens {
            access_token: self.issue_session(
                SessionTokenKind::Access,
                user_uuid,
                auth_type_uuid,
                access_token_api,
            )?,
            refresh_token: self.issue_session(
                SessionTokenKind::Refresh,
                user_uuid,
                auth_type_uuid,
                refresh_token_api,
            )?,
        })
    }

    pub fn issue_reset(&self, user_uuid: Uuid, email: &str) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = ResetClaims {
            users_id: user_uuid.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: (now + self.keys.reset.ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        Self::sign(&claims, &self.keys.reset)
    }

    /// Signature and expiry only; no store access.
    pub fn is_signature_valid(&self, token: &str, kind: SessionTokenKind) -> bool {
        Self::decode_claims::<SessionClaims>(token, self.session_key(kind), &strict_validation())
            .is_ok()
    }

    /// Verify signature and expiry, then confirm user and auth type still exist.
    pub async fn parse_validated(
        &self,
        token: &str,
        kind: SessionTokenKind,
    ) -> Result<SessionSubject, ServiceError> {
        let claims = Self::decode_claims::<SessionClaims>(
            token,
            self.session_key(kind),
            &strict_validation(),
        )?;
        self.resolve_session(claims).await
    }

    /// Read the claims of a possibly expired or unsigned token, then confirm
    /// user and auth type still exist. Only for flows that match the token
    /// against the stored pair afterwards.
    pub async fn parse_unvalidated(
        &self,
        token: &str,
        kind: SessionTokenKind,
    ) -> Result<SessionSubject, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;

        let claims =
            Self::decode_claims::<SessionClaims>(token, self.session_key(kind), &validation)?;
        self.resolve_session(claims).await
    }

    pub async fn parse_reset(&self, token: &str) -> Result<ResetSubject, ServiceError> {
        let claims =
            Self::decode_claims::<ResetClaims>(token, &self.keys.reset, &strict_validation())?;
        let user_uuid = parse_subject_uuid(&claims.users_id)?;

        let mut tx = self.store.begin().await?;
        let user = tx
            .find_user(&UserLookup::Uuid(user_uuid))
            .await?
            .filter(|user| user.email.eq_ignore_ascii_case(&claims.email))
            .ok_or_else(|| {
                ServiceError::Authentication("reset token references an unknown user".to_string())
            })?;

        Ok(ResetSubject {
            user,
            email: claims.email,
        })
    }

    async fn resolve_session(&self, claims: SessionClaims) -> Result<SessionSubject, ServiceError> {
        let user_uuid = parse_subject_uuid(&claims.users_id)?;
        let auth_type_uuid = parse_subject_uuid(&claims.auth_types_id)?;

        let mut tx = self.store.begin().await?;
        let user = tx
            .find_user(&UserLookup::Uuid(user_uuid))
            .await?
            .ok_or_else(|| {
                ServiceError::Authentication("token references an unknown user".to_string())
            })?;
        let auth_type = tx
            .find_auth_type(&AuthTypeLookup::Uuid(auth_type_uuid))
            .await?
            .ok_or_else(|| {
                ServiceError::Authentication("token references an unknown auth type".to_string())
            })?;
        let auth_kind = auth_type.kind().ok_or_else(|| {
            ServiceError::Authentication(format!("unsupported auth type {}", auth_type.value))
        })?;

        Ok(SessionSubject {
            user,
            auth_type,
            auth_kind,
            token_api: claims.token_api,
        })
    }
}

fn parse_subject_uuid(raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::Authentication("token subject is malformed".to_string()))
}
