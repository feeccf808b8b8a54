use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::AuthKind;
use crate::services::{ErrorKind, ServiceError, SessionSubject};
use crate::AppState;

/// Authenticated caller, inserted into request extensions by [`user_identity`].
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub user_uuid: Uuid,
    pub auth_kind: AuthKind,
    pub token_api: Option<String>,
    pub access_token: String,
    pub domain_id: i64,
    pub domain_uuid: Uuid,
}

/// How a list of required roles is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleMatch {
    /// Every role is required
    All,
    /// One role is enough
    Any,
}

fn bearer_token(req: &Request) -> Result<String, AppError> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::AuthError(anyhow::anyhow!("Missing or invalid Authorization header"))
        })
}

async fn attach_identity(
    state: &AppState,
    req: &mut Request,
    access_token: String,
    subject: SessionSubject,
) -> Result<(), AppError> {
    let domain = state.sessions.scope_domain().await.map_err(|e| {
        tracing::error!(error = %e, "Scope domain unavailable");
        AppError::AuthError(anyhow::anyhow!("Invalid or expired token"))
    })?;
    req.extensions_mut().insert(Identity {
        user_id: subject.user.id,
        user_uuid: subject.user.uuid,
        auth_kind: subject.auth_kind,
        token_api: subject.token_api,
        access_token,
        domain_id: domain.id,
        domain_uuid: domain.uuid,
    });
    Ok(())
}

/// Require a valid, unexpired access token.
pub async fn user_identity(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)?;
    let subject = state.sessions.authenticate(&token).await.map_err(|e| {
        tracing::debug!(error = %e, "Access token rejected");
        AppError::AuthError(anyhow::anyhow!("Invalid or expired token"))
    })?;

    attach_identity(&state, &mut req, token, subject).await?;
    Ok(next.run(req).await)
}

/// Identify the caller even when the access token has expired. Only for logout.
pub async fn user_identity_logout(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)?;
    let subject = state
        .sessions
        .authenticate_expired(&token)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            AppError::AuthError(anyhow::anyhow!("Invalid token"))
        })?;

    attach_identity(&state, &mut req, token, subject).await?;
    Ok(next.run(req).await)
}

/// A role lookup that cannot be answered denies access; only store failures
/// surface as 500.
fn role_check_error(err: ServiceError) -> AppError {
    match err.kind() {
        ErrorKind::Infrastructure => AppError::from(err),
        _ => {
            tracing::warn!(error = %err, "Role check failed");
            AppError::Forbidden(anyhow::anyhow!("Access denied"))
        }
    }
}

fn identity_of(req: &Request) -> Result<Identity, AppError> {
    req.extensions().get::<Identity>().cloned().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!("Identity missing from request extensions"))
    })
}

/// Reject with 403 unless the caller holds the roles in its domain.
pub async fn require_roles(
    State(state): State<AppState>,
    mode: RoleMatch,
    roles: Vec<String>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = identity_of(&req)?;

    let mut matched = 0;
    for role in &roles {
        if state
            .enforcer
            .has_role(identity.user_id, identity.domain_id, role)
            .await
            .map_err(role_check_error)?
        {
            matched += 1;
            if mode == RoleMatch::Any {
                break;
            }
        }
    }

    let allowed = match mode {
        RoleMatch::All => matched == roles.len(),
        RoleMatch::Any => matched > 0,
    };
    if !allowed {
        tracing::warn!(user_id = identity.user_id, required = ?roles, mode = ?mode, "Insufficient roles");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Insufficient roles. Required: {}",
            roles.join(", ")
        )));
    }

    Ok(next.run(req).await)
}

/// Reject with 403 unless the caller holds `role` for the object whose uuid
/// is in the path parameter `param`.
pub async fn require_subject_role(
    State(state): State<AppState>,
    role: String,
    param: &'static str,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = identity_of(&req)?;

    let (mut parts, body) = req.into_parts();
    let Path(params) = Path::<HashMap<String, String>>::from_request_parts(&mut parts, &state)
        .await
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid path: {}", e)))?;
    let req = Request::from_parts(parts, body);

    let object_uuid = params.get(param).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Missing path parameter '{}'", param))
    })?;

    if !state
        .enforcer
        .has_role_with_subject(identity.user_id, identity.domain_id, &role, object_uuid)
        .await
        .map_err(role_check_error)?
    {
        tracing::warn!(user_id = identity.user_id, role = %role, object = %object_uuid, "Insufficient subject role");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Role '{}' is required for this object",
            role
        )));
    }

    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Identity>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("Identity missing from request extensions"))
        })
    }
}
