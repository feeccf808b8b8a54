use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SignUpRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "password123", min_length = 8)]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    #[schema(example = "Ada")]
    pub name: String,

    #[validate(length(min = 1, max = 100, message = "Surname is required"))]
    #[schema(example = "Lovelace")]
    pub surname: String,

    #[validate(length(max = 32))]
    #[schema(example = "+44 20 7946 0000")]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SignInRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "password123")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OAuthSignInRequest {
    #[validate(length(min = 1, message = "Authorization code is required"))]
    #[schema(example = "4/0AX4XfWh")]
    pub code: String,
}

/// Body of every response that opens or refreshes a session. The refresh
/// token travels in the cookie.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccessTokenResponse {
    #[schema(example = "eyJhbGciOiJIUzI1NiJ9...")]
    pub access_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    #[schema(example = true)]
    pub is_logout: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivationResponse {
    #[schema(example = true)]
    pub is_activated: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RecoveryPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    #[schema(example = "eyJhbGciOiJIUzI1NiJ9...")]
    pub token: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "newpassword123", min_length = 8)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "Password reset email sent")]
    pub message: String,
}
