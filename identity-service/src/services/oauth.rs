use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::GoogleOAuthConfig;
use crate::services::ServiceError;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_TOKEN_INFO_URL: &str = "https://www.googleapis.com/oauth2/v1/tokeninfo";
const GOOGLE_USER_INFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

/// Tokens handed out by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub email: String,
    pub given_name: String,
    pub family_name: String,
}

/// External identity provider used for federated sign-in.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ServiceError>;

    /// `Ok(false)` when the provider no longer recognises the token.
    async fn verify_access_token(&self, access_token: &str) -> Result<bool, ServiceError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ServiceError>;

    async fn refresh_access_token(&self, refresh_token: &str)
        -> Result<ProviderTokens, ServiceError>;

    async fn revoke_token(&self, token: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
    #[serde(default)]
    verified_email: bool,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    email: String,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    family_name: String,
}

pub struct GoogleOAuthClient {
    config: GoogleOAuthConfig,
    client: Client,
}

impl GoogleOAuthClient {
    pub fn new(config: GoogleOAuthConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<ProviderTokens, ServiceError> {
        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(form)
            .send()
            .await
            .map_err(|e| ServiceError::Provider(format!("Failed to reach Google: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ServiceError::Authentication(format!(
                "Google rejected the token request with status {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(ServiceError::Provider(format!(
                "Google token endpoint returned status {}",
                status
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            ServiceError::Provider(format!("Failed to parse Google token response: {}", e))
        })?;

        Ok(ProviderTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        })
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuthClient {
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ServiceError> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("redirect_uri", &self.config.redirect_uri),
        ])
        .await
    }

    async fn verify_access_token(&self, access_token: &str) -> Result<bool, ServiceError> {
        let response = self
            .client
            .get(GOOGLE_TOKEN_INFO_URL)
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| ServiceError::Provider(format!("Failed to reach Google: {}", e)))?;

        // tokeninfo answers 400 for expired or revoked tokens
        if response.status().is_client_error() {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(ServiceError::Provider(format!(
                "Google tokeninfo returned status {}",
                response.status()
            )));
        }

        let info: TokenInfoResponse = response.json().await.map_err(|e| {
            ServiceError::Provider(format!("Failed to parse Google tokeninfo response: {}", e))
        })?;
        Ok(info.verified_email)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ServiceError> {
        let response = self
            .client
            .get(GOOGLE_USER_INFO_URL)
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| ServiceError::Provider(format!("Failed to reach Google: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::Authentication(format!(
                "Google userinfo returned status {}",
                response.status()
            )));
        }

        let info: UserInfoResponse = response.json().await.map_err(|e| {
            ServiceError::Provider(format!("Failed to parse Google userinfo response: {}", e))
        })?;

        Ok(ProviderProfile {
            email: info.email,
            given_name: info.given_name,
            family_name: info.family_name,
        })
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<ProviderTokens, ServiceError> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ])
        .await
    }

    async fn revoke_token(&self, token: &str) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(GOOGLE_REVOKE_URL)
            .query(&[("token", token)])
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await
            .map_err(|e| ServiceError::Provider(format!("Failed to reach Google: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::Provider(format!(
                "Google revoke returned status {}",
                response.status()
            )));
        }

        tracing::info!("Provider token revoked");
        Ok(())
    }
}

#[derive(Default)]
struct MockState {
    codes: HashMap<String, (ProviderTokens, ProviderProfile)>,
    valid_tokens: HashMap<String, ProviderProfile>,
    refresh_grants: HashMap<String, ProviderTokens>,
    revoked: Vec<String>,
    fail_revoke: bool,
}

/// In-process provider: codes, tokens and refresh grants are registered up front.
#[derive(Clone, Default)]
pub struct MockOAuthProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockOAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, ServiceError> {
        self.state
            .lock()
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("mock provider poisoned")))
    }

    /// Make `code` exchangeable for `tokens`, whose access token then
    /// verifies and resolves to `profile`.
    pub fn register_code(&self, code: &str, tokens: ProviderTokens, profile: ProviderProfile) {
        if let Ok(mut state) = self.lock() {
            state
                .valid_tokens
                .insert(tokens.access_token.clone(), profile.clone());
            state.codes.insert(code.to_string(), (tokens, profile));
        }
    }

    /// Answer a refresh with `refresh_token` by issuing `tokens`.
    pub fn register_refresh(&self, refresh_token: &str, tokens: ProviderTokens) {
        if let Ok(mut state) = self.lock() {
            let profile = state.valid_tokens.values().next().cloned();
            if let Some(profile) = profile {
                state
                    .valid_tokens
                    .insert(tokens.access_token.clone(), profile);
            }
            state
                .refresh_grants
                .insert(refresh_token.to_string(), tokens);
        }
    }

    /// Stop confirming an access token, as if it expired upstream.
    pub fn invalidate(&self, access_token: &str) {
        if let Ok(mut state) = self.lock() {
            state.valid_tokens.remove(access_token);
        }
    }

    pub fn set_fail_revoke(&self, fail: bool) {
        if let Ok(mut state) = self.lock() {
            state.fail_revoke = fail;
        }
    }

    pub fn revoked(&self) -> Vec<String> {
        self.lock().map(|s| s.revoked.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OAuthProvider for MockOAuthProvider {
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ServiceError> {
        self.lock()?
            .codes
            .get(code)
            .map(|(tokens, _)| tokens.clone())
            .ok_or_else(|| ServiceError::Authentication("unknown authorization code".to_string()))
    }

    async fn verify_access_token(&self, access_token: &str) -> Result<bool, ServiceError> {
        Ok(self.lock()?.valid_tokens.contains_key(access_token))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ServiceError> {
        self.lock()?
            .valid_tokens
            .get(access_token)
            .cloned()
            .ok_or_else(|| ServiceError::Authentication("unknown provider token".to_string()))
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<ProviderTokens, ServiceError> {
        self.lock()?
            .refresh_grants
            .get(refresh_token)
            .cloned()
            .ok_or_else(|| ServiceError::Authentication("unknown provider refresh token".to_string()))
    }

    async fn revoke_token(&self, token: &str) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if state.fail_revoke {
            return Err(ServiceError::Provider("revoke endpoint unavailable".to_string()));
        }
        state.valid_tokens.remove(token);
        state.revoked.push(token.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ProviderProfile {
        ProviderProfile {
            email: "g@x.com".to_string(),
            given_name: "Grace".to_string(),
            family_name: "Hopper".to_string(),
        }
    }

    #[test]
    fn test_google_client_builds() {
        let client = GoogleOAuthClient::new(GoogleOAuthConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost/callback".to_string(),
        });
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_mock_code_exchange_and_revoke() {
        let provider = MockOAuthProvider::new();
        provider.register_code(
            "code-1",
            ProviderTokens {
                access_token: "ya29.a".to_string(),
                refresh_token: Some("1//r".to_string()),
            },
            profile(),
        );

        let tokens = provider.exchange_code("code-1").await.unwrap();
        assert!(provider.verify_access_token(&tokens.access_token).await.unwrap());
        assert_eq!(
            provider.fetch_profile(&tokens.access_token).await.unwrap(),
            profile()
        );

        provider.revoke_token(&tokens.access_token).await.unwrap();
        assert!(!provider.verify_access_token(&tokens.access_token).await.unwrap());
        assert_eq!(provider.revoked(), vec!["ya29.a".to_string()]);

        assert!(provider.exchange_code("unknown").await.is_err());
    }
}
