//! Shared fixtures for identity-service integration tests.
//!
//! Everything runs against the in-memory store with mock mail and identity
//! provider, so no database or network is needed.

#![allow(dead_code)]

use identity_service::{
    build_router,
    config::{
        CookieConfig, DatabaseConfig, Environment, GoogleOAuthConfig, IdentityConfig, JwtConfig,
        LinkConfig, PasswordConfig, RateLimitConfig, RbacConfig, SecurityConfig, SmtpConfig,
    },
    models::{Domain, Role, User, UserProfile},
    services::{
        MockEmailService, MockOAuthProvider, ProviderProfile, ProviderTokens, SignUpInput,
    },
    store::{MemoryStore, Store, UserLookup},
    utils::Password,
    AppState,
};
use service_core::config::Config as CoreConfig;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

pub const DOMAIN: &str = "crm";
pub const DEFAULT_ROLE: &str = "client";
pub const ADMIN_ROLE: &str = "admin";
pub const PASSWORD: &str = "correct horse battery";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: CoreConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            otlp_endpoint: None,
        },
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        jwt: JwtConfig {
            access_secret: "test-access-secret".to_string(),
            refresh_secret: "test-refresh-secret".to_string(),
            reset_secret: "test-reset-secret".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_minutes: 60,
            reset_token_ttl_minutes: 30,
        },
        rbac: RbacConfig {
            domain: DOMAIN.to_string(),
            default_role: DEFAULT_ROLE.to_string(),
            admin_role: ADMIN_ROLE.to_string(),
        },
        password: PasswordConfig { hash_cost: 1 },
        google: GoogleOAuthConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "http://localhost:3000/auth/google".to_string(),
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 25,
            user: String::new(),
            password: String::new(),
            from: "no-reply@localhost".to_string(),
        },
        links: LinkConfig {
            api_url: "http://api.test".to_string(),
            client_url: "http://app.test".to_string(),
        },
        cookie: CookieConfig {
            name: "refresh_token".to_string(),
            domain: None,
            secure: false,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://app.test".to_string()],
            swagger_enabled: false,
        },
        rate_limit: RateLimitConfig {
            sign_in_attempts: 100,
            sign_in_window_seconds: 60,
            sign_up_attempts: 100,
            sign_up_window_seconds: 60,
            recovery_attempts: 100,
            recovery_window_seconds: 60,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
    }
}

/// A seeded store plus handles on every collaborator.
pub struct TestContext {
    pub store: MemoryStore,
    pub email: MockEmailService,
    pub oauth: MockOAuthProvider,
    pub state: AppState,
    pub domain: Domain,
    pub default_role: Role,
    pub admin_role: Role,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Refresh tokens are issued already expired, so every refresh rotates.
    pub async fn with_expired_refresh() -> Self {
        let mut config = test_config();
        config.jwt.refresh_token_ttl_minutes = -1;
        Self::with_config(config).await
    }

    pub async fn with_config(config: IdentityConfig) -> Self {
        let store = MemoryStore::new();
        let domain = store.seed_domain(DOMAIN, "Customer relations").await;
        let default_role = store
            .seed_role(DEFAULT_ROLE, "Client", Some(domain.id))
            .await;
        let admin_role = store.seed_role(ADMIN_ROLE, "Administrator", None).await;

        let email = MockEmailService::new();
        let oauth = MockOAuthProvider::new();
        let state = AppState::new(
            config,
            Arc::new(store.clone()),
            Arc::new(email.clone()),
            Arc::new(oauth.clone()),
        );

        Self {
            store,
            email,
            oauth,
            state,
            domain,
            default_role,
            admin_role,
        }
    }

    pub async fn router(&self) -> axum::Router {
        build_router(self.state.clone())
            .await
            .expect("router should build")
    }

    pub async fn sign_up(&self, email: &str) -> identity_service::services::SessionTokens {
        self.state
            .credentials
            .sign_up(sign_up_input(email))
            .await
            .expect("sign-up should succeed")
    }

    pub async fn user(&self, email: &str) -> User {
        let mut tx = self.store.begin().await.expect("begin");
        tx.find_user(&UserLookup::Email(email.to_string()))
            .await
            .expect("lookup")
            .expect("user should exist")
    }

    /// Register `code` with the mock provider for a Google account.
    pub fn register_google(&self, code: &str, email: &str, access: &str, refresh: Option<&str>) {
        self.oauth.register_code(
            code,
            ProviderTokens {
                access_token: access.to_string(),
                refresh_token: refresh.map(str::to_string),
            },
            ProviderProfile {
                email: email.to_string(),
                given_name: "Grace".to_string(),
                family_name: "Hopper".to_string(),
            },
        );
    }

    /// Last mailed link that starts with `prefix`, without the prefix.
    pub fn mailed_link(&self, prefix: &str) -> Option<String> {
        self.email.sent().iter().rev().find_map(|mail| {
            let start = mail.body.find(prefix)? + prefix.len();
            let rest = &mail.body[start..];
            let end = rest.find(['"', '<', ' ']).unwrap_or(rest.len());
            Some(rest[..end].to_string())
        })
    }

    pub fn activation_link(&self) -> Option<String> {
        self.mailed_link("http://api.test/auth/activate/")
    }

    pub fn reset_token(&self) -> Option<String> {
        self.mailed_link("http://app.test/auth/reset/password/")
    }
}

pub fn sign_up_input(email: &str) -> SignUpInput {
    SignUpInput {
        email: email.to_string(),
        password: Password::new(PASSWORD),
        profile: UserProfile {
            name: "Ada".to_string(),
            surname: "Lovelace".to_string(),
            phone: None,
        },
    }
}
