use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub rbac: RbacConfig,
    pub password: PasswordConfig,
    pub google: GoogleOAuthConfig,
    pub smtp: SmtpConfig,
    pub links: LinkConfig,
    pub cookie: CookieConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// HMAC keys and lifetimes for the three token families.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub reset_secret: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_minutes: i64,
    pub reset_token_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RbacConfig {
    /// Value of the domain every session is scoped to.
    pub domain: String,
    /// Role granted at sign-up and required at login.
    pub default_role: String,
    pub admin_role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    /// Argon2 iteration count.
    pub hash_cost: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Base of activation links (this service).
    pub api_url: String,
    /// Base of password reset pages (the client application).
    pub client_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    pub domain: Option<String>,
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub swagger_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub sign_in_attempts: u32,
    pub sign_in_window_seconds: u64,
    pub sign_up_attempts: u32,
    pub sign_up_window_seconds: u64,
    pub recovery_attempts: u32,
    pub recovery_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", Some("10"), is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", Some("1"), is_prod)?,
            },
            jwt: JwtConfig {
                access_secret: get_env("JWT_ACCESS_SECRET", None, is_prod)?,
                refresh_secret: get_env("JWT_REFRESH_SECRET", None, is_prod)?,
                reset_secret: get_env("JWT_RESET_SECRET", None, is_prod)?,
                access_token_ttl_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_TTL_MINUTES",
                    Some("15"),
                    is_prod,
                )?,
                refresh_token_ttl_minutes: parse_env(
                    "JWT_REFRESH_TOKEN_TTL_MINUTES",
                    Some("43200"),
                    is_prod,
                )?,
                reset_token_ttl_minutes: parse_env(
                    "JWT_RESET_TOKEN_TTL_MINUTES",
                    Some("60"),
                    is_prod,
                )?,
            },
            rbac: RbacConfig {
                domain: get_env("RBAC_DOMAIN", None, is_prod)?,
                default_role: get_env("RBAC_DEFAULT_ROLE", Some("client"), is_prod)?,
                admin_role: get_env("RBAC_ADMIN_ROLE", Some("admin"), is_prod)?,
            },
            password: PasswordConfig {
                hash_cost: parse_env("PASSWORD_HASH_COST", Some("3"), is_prod)?,
            },
            google: GoogleOAuthConfig {
                client_id: get_env("GOOGLE_CLIENT_ID", Some(""), is_prod)?,
                client_secret: get_env("GOOGLE_CLIENT_SECRET", Some(""), is_prod)?,
                redirect_uri: get_env(
                    "GOOGLE_REDIRECT_URI",
                    Some("http://localhost:3000/auth/google"),
                    is_prod,
                )?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", Some("587"), is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from: get_env("SMTP_FROM", Some("no-reply@localhost"), is_prod)?,
            },
            links: LinkConfig {
                api_url: get_env("API_URL", Some("http://localhost:8080"), is_prod)?,
                client_url: get_env("CLIENT_URL", Some("http://localhost:3000"), is_prod)?,
            },
            cookie: CookieConfig {
                name: get_env("COOKIE_NAME", Some("refresh_token"), is_prod)?,
                domain: env::var("COOKIE_DOMAIN").ok().filter(|d| !d.is_empty()),
                secure: parse_env("COOKIE_SECURE", Some("false"), is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                swagger_enabled: parse_env("ENABLE_SWAGGER", Some("true"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                sign_in_attempts: parse_env("RATE_LIMIT_SIGN_IN_ATTEMPTS", Some("5"), is_prod)?,
                sign_in_window_seconds: parse_env(
                    "RATE_LIMIT_SIGN_IN_WINDOW_SECONDS",
                    Some("900"),
                    is_prod,
                )?,
                sign_up_attempts: parse_env("RATE_LIMIT_SIGN_UP_ATTEMPTS", Some("3"), is_prod)?,
                sign_up_window_seconds: parse_env(
                    "RATE_LIMIT_SIGN_UP_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
                recovery_attempts: parse_env("RATE_LIMIT_RECOVERY_ATTEMPTS", Some("3"), is_prod)?,
                recovery_window_seconds: parse_env(
                    "RATE_LIMIT_RECOVERY_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        let jwt = &self.jwt;
        if [&jwt.access_secret, &jwt.refresh_secret, &jwt.reset_secret]
            .iter()
            .any(|secret| secret.is_empty())
        {
            return Err(config_error("JWT signing secrets must not be empty"));
        }

        if jwt.access_secret == jwt.refresh_secret || jwt.access_secret == jwt.reset_secret {
            return Err(config_error(
                "Access, refresh and reset tokens must use distinct secrets",
            ));
        }

        if jwt.access_token_ttl_minutes <= 0
            || jwt.refresh_token_ttl_minutes <= 0
            || jwt.reset_token_ttl_minutes <= 0
        {
            return Err(config_error("JWT token lifetimes must be positive"));
        }

        if self.password.hash_cost == 0 {
            return Err(config_error("PASSWORD_HASH_COST must be at least 1"));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error(
                    "Wildcard CORS origin not allowed in production",
                ));
            }

            if !self.cookie.secure {
                tracing::warn!("COOKIE_SECURE is off in production; refresh cookies will travel over plain HTTP");
            }
        }

        Ok(())
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, default, is_prod)?;
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e))
    })
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample() -> IdentityConfig {
        IdentityConfig {
            common: core_config::Config {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 8080,
                otlp_endpoint: None,
            },
            environment: Environment::Prod,
            service_name: "identity-service".to_string(),
            service_version: "0.1.0".to_string(),
            log_level: "info".to_string(),
            database: DatabaseConfig {
                url: "postgres://localhost/identity".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            jwt: JwtConfig {
                access_secret: "access".to_string(),
                refresh_secret: "refresh".to_string(),
                reset_secret: "reset".to_string(),
                access_token_ttl_minutes: 15,
                refresh_token_ttl_minutes: 60,
                reset_token_ttl_minutes: 30,
            },
            rbac: RbacConfig {
                domain: "crm".to_string(),
                default_role: "client".to_string(),
                admin_role: "admin".to_string(),
            },
            password: PasswordConfig { hash_cost: 2 },
            google: GoogleOAuthConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "http://localhost/cb".to_string(),
            },
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 25,
                user: String::new(),
                password: String::new(),
                from: "no-reply@localhost".to_string(),
            },
            links: LinkConfig {
                api_url: "http://localhost:8080".to_string(),
                client_url: "http://localhost:3000".to_string(),
            },
            cookie: CookieConfig {
                name: "refresh_token".to_string(),
                domain: None,
                secure: true,
            },
            security: SecurityConfig {
                allowed_origins: vec!["https://app.example.com".to_string()],
                swagger_enabled: false,
            },
            rate_limit: RateLimitConfig {
                sign_in_attempts: 5,
                sign_in_window_seconds: 900,
                sign_up_attempts: 3,
                sign_up_window_seconds: 3600,
                recovery_attempts: 3,
                recovery_window_seconds: 3600,
                global_ip_limit: 100,
                global_ip_window_seconds: 60,
            },
        }
    }

    #[test]
    fn test_sample_is_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_shared_secret_is_rejected() {
        let mut config = sample();
        config.jwt.refresh_secret = config.jwt.access_secret.clone();
        assert!(matches!(config.validate(), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_non_positive_ttl_is_rejected() {
        let mut config = sample();
        config.jwt.reset_token_ttl_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_origin_rejected_in_prod() {
        let mut config = sample();
        config.security.allowed_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());

        config.environment = Environment::Dev;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
