pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state, Next},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::IdentityConfig;
use crate::middleware::{metrics_middleware, RoleMatch};
use crate::services::{
    CredentialManager, EmailProvider, Enforcer, OAuthProvider, RoleService, SessionManager,
    TokenCodec,
};
use crate::store::Store;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::sign_up,
        handlers::auth::sign_in,
        handlers::auth::sign_in_oauth2,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::activate,
        handlers::auth::recovery_password,
        handlers::auth::reset_password,
        handlers::user::me,
        handlers::user::update_me,
        handlers::user::verify,
        handlers::user::my_roles,
        handlers::user::access_check,
        handlers::admin::grant_role,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::SignUpRequest,
            dtos::auth::SignInRequest,
            dtos::auth::OAuthSignInRequest,
            dtos::auth::AccessTokenResponse,
            dtos::auth::LogoutResponse,
            dtos::auth::ActivationResponse,
            dtos::auth::RecoveryPasswordRequest,
            dtos::auth::ResetPasswordRequest,
            dtos::auth::MessageResponse,
            dtos::user::UserResponse,
            dtos::user::UpdateProfileRequest,
            dtos::user::VerifyResponse,
            dtos::user::RoleEntry,
            dtos::user::RolesResponse,
            dtos::user::AccessResponse,
            dtos::admin::GrantRoleRequest,
            dtos::admin::GrantRoleResponse,
            models::UserProfile,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Sign-up, sessions and password recovery"),
        (name = "User", description = "Profile and roles of the current user"),
        (name = "Admin", description = "Role administration"),
        (name = "Service", description = "Token checks for other services"),
        (name = "Observability", description = "Health and metrics")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn Store>,
    pub enforcer: Enforcer,
    pub sessions: SessionManager,
    pub credentials: CredentialManager,
    pub roles: RoleService,
    pub sign_in_rate_limiter: IpRateLimiter,
    pub sign_up_rate_limiter: IpRateLimiter,
    pub recovery_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire the managers around one store and the two outbound collaborators.
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn Store>,
        email: Arc<dyn EmailProvider>,
        oauth: Arc<dyn OAuthProvider>,
    ) -> Self {
        let enforcer = Enforcer::new(store.clone());
        let codec = TokenCodec::new(store.clone(), &config.jwt);

        let sessions = SessionManager::new(
            store.clone(),
            enforcer.clone(),
            codec.clone(),
            oauth,
            config.rbac.clone(),
        );
        let credentials = CredentialManager::new(
            store.clone(),
            enforcer.clone(),
            codec,
            email,
            config.rbac.clone(),
            config.password.clone(),
            config.links.clone(),
        );
        let roles = RoleService::new(store.clone(), enforcer.clone());

        let limits = &config.rate_limit;
        let sign_in_rate_limiter =
            create_ip_rate_limiter(limits.sign_in_attempts, limits.sign_in_window_seconds);
        let sign_up_rate_limiter =
            create_ip_rate_limiter(limits.sign_up_attempts, limits.sign_up_window_seconds);
        let recovery_rate_limiter =
            create_ip_rate_limiter(limits.recovery_attempts, limits.recovery_window_seconds);
        let ip_rate_limiter =
            create_ip_rate_limiter(limits.global_ip_limit, limits.global_ip_window_seconds);

        Self {
            config,
            store,
            enforcer,
            sessions,
            credentials,
            roles,
            sign_in_rate_limiter,
            sign_up_rate_limiter,
            recovery_rate_limiter,
            ip_rate_limiter,
        }
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let sign_in_routes = Router::new()
        .route("/auth/sign-in", post(handlers::auth::sign_in))
        .route("/auth/sign-in/oauth2", post(handlers::auth::sign_in_oauth2))
        .layer(from_fn_with_state(
            state.sign_in_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let sign_up_route = Router::new()
        .route("/auth/sign-up", post(handlers::auth::sign_up))
        .layer(from_fn_with_state(
            state.sign_up_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let recovery_route = Router::new()
        .route(
            "/auth/recovery/password",
            post(handlers::auth::recovery_password),
        )
        .layer(from_fn_with_state(
            state.recovery_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let logout_route = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::user_identity_logout,
        ));

    let user_routes = Router::new()
        .route("/users/me", get(handlers::user::me).put(handlers::user::update_me))
        .route("/users/me/roles", get(handlers::user::my_roles))
        .route("/users/me/access/:role", get(handlers::user::access_check))
        .route("/service/external/verify", post(handlers::user::verify))
        .layer(from_fn_with_state(state.clone(), middleware::user_identity));

    let admin_role = state.config.rbac.admin_role.clone();
    let admin_routes = Router::new()
        .route("/admin/roles/grant", post(handlers::admin::grant_role))
        .layer(from_fn_with_state(
            state.clone(),
            move |s: State<AppState>, req: Request, next: Next| {
                middleware::require_roles(s, RoleMatch::Any, vec![admin_role.clone()], req, next)
            },
        ))
        .layer(from_fn_with_state(state.clone(), middleware::user_identity));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    if state.config.security.swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let cors = cors_layer(&state.config.security.allowed_origins)?;

    let app = app
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/activate/:link", get(handlers::auth::activate))
        .route("/auth/reset/password", post(handlers::auth::reset_password))
        .merge(sign_in_routes)
        .merge(sign_up_route)
        .merge(recovery_route)
        .merge(logout_route)
        .merge(user_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        // Global IP rate limiting
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(cors);

    Ok(app)
}

/// The refresh cookie needs credentialed CORS, which a wildcard origin
/// cannot carry; `*` (dev only) therefore disables credentials.
fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, AppError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if allowed_origins.iter().any(|origin| origin == "*") {
        return Ok(cors.allow_origin(Any));
    }

    let origins = allowed_origins
        .iter()
        .map(|origin| {
            origin.parse::<HeaderValue>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", origin, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(cors.allow_origin(origins).allow_credentials(true))
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Store is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
    })))
}
