use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;

use crate::{
    config::CookieConfig,
    dtos::auth::{
        AccessTokenResponse, ActivationResponse, LogoutResponse, MessageResponse,
        OAuthSignInRequest, RecoveryPasswordRequest, ResetPasswordRequest, SignInRequest,
        SignUpRequest,
    },
    middleware::Identity,
    models::UserProfile,
    services::{SessionTokens, SignUpInput},
    utils::{Password, ValidatedJson},
    AppState,
};

const REFRESH_COOKIE_DAYS: i64 = 30;

fn refresh_cookie(config: &CookieConfig, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::build((config.name.clone(), value))
        .path("/")
        .http_only(true)
        .secure(config.secure)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::days(REFRESH_COOKIE_DAYS));
    if let Some(domain) = &config.domain {
        cookie = cookie.domain(domain.clone());
    }
    cookie.build()
}

fn session_response(
    state: &AppState,
    jar: CookieJar,
    tokens: SessionTokens,
) -> (CookieJar, Json<AccessTokenResponse>) {
    let jar = jar.add(refresh_cookie(&state.config.cookie, tokens.refresh_token));
    (
        jar,
        Json(AccessTokenResponse {
            access_token: tokens.access_token,
        }),
    )
}

fn refresh_token_from(state: &AppState, jar: &CookieJar) -> Result<String, AppError> {
    jar.get(&state.config.cookie.name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing refresh token cookie")))
}

/// Register with email and password
#[utoipa::path(
    post,
    path = "/auth/sign-up",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "User registered, refresh token set as cookie", body = AccessTokenResponse),
        (status = 404, description = "Default domain or role missing", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn sign_up(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SignUpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state
        .credentials
        .sign_up(SignUpInput {
            email: req.email,
            password: Password::new(req.password),
            profile: UserProfile {
                name: req.name,
                surname: req.surname,
                phone: req.phone,
            },
        })
        .await?;

    let (jar, body) = session_response(&state, jar, tokens);
    Ok((StatusCode::CREATED, jar, body))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Login successful, refresh token set as cookie", body = AccessTokenResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "User has no access to this domain", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn sign_in(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SignInRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state
        .sessions
        .login(&req.email, &Password::new(req.password))
        .await?;
    Ok(session_response(&state, jar, tokens))
}

/// Login with a Google authorization code
#[utoipa::path(
    post,
    path = "/auth/sign-in/oauth2",
    request_body = OAuthSignInRequest,
    responses(
        (status = 200, description = "Login successful, refresh token set as cookie", body = AccessTokenResponse),
        (status = 401, description = "Provider rejected the code", body = ErrorResponse),
        (status = 403, description = "User has no access to this domain", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn sign_in_oauth2(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<OAuthSignInRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.sessions.login_oauth2(&req.code).await?;
    Ok(session_response(&state, jar, tokens))
}

/// Issue a new access token from the refresh token cookie
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Token refreshed", body = AccessTokenResponse),
        (status = 401, description = "Missing, invalid or stale refresh token", body = ErrorResponse),
        (status = 403, description = "User has no access to this domain", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = refresh_token_from(&state, &jar)?;
    let tokens = state.sessions.refresh(&refresh_token).await?;
    Ok(session_response(&state, jar, tokens))
}

/// End the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out, cookie cleared", body = LogoutResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 404, description = "No session matches the presented tokens", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    identity: Identity,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = refresh_token_from(&state, &jar)?;
    state
        .sessions
        .logout(&identity.access_token, &refresh_token)
        .await?;

    let jar = jar.remove(Cookie::build((state.config.cookie.name.clone(), "")).path("/"));
    Ok((jar, Json(LogoutResponse { is_logout: true })))
}

/// Confirm the email address behind an activation link
#[utoipa::path(
    get,
    path = "/auth/activate/{link}",
    params(
        ("link" = String, Path, description = "Activation link uuid")
    ),
    responses(
        (status = 200, description = "Account activated", body = ActivationResponse),
        (status = 400, description = "Malformed link", body = ErrorResponse),
        (status = 404, description = "Unknown link", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn activate(
    State(state): State<AppState>,
    Path(link): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let is_activated = state.credentials.activate(&link).await?;
    Ok(Json(ActivationResponse { is_activated }))
}

/// Mail a password reset link
#[utoipa::path(
    post,
    path = "/auth/recovery/password",
    request_body = RecoveryPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent", body = MessageResponse),
        (status = 400, description = "Account does not use a password", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn recovery_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RecoveryPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.recovery_password(&req.email).await?;
    Ok(Json(MessageResponse {
        message: "Password reset email sent".to_string(),
    }))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/auth/reset/password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 401, description = "Invalid or mismatched reset token", body = ErrorResponse),
        (status = 404, description = "Unknown reset token", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .credentials
        .reset_password(&req.token, &Password::new(req.password))
        .await?;
    Ok(Json(MessageResponse {
        message: "Password has been reset".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_cookie_attributes() {
        let config = CookieConfig {
            name: "refresh_token".to_string(),
            domain: Some("example.com".to_string()),
            secure: true,
        };

        let cookie = refresh_cookie(&config, "abc".to_string());
        assert_eq!(cookie.name(), "refresh_token");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(30)));
    }
}
