//! Business logic for identity-service.
//!
//! The enforcer and token codec sit at the bottom; the session, credential
//! and role managers orchestrate them inside store transactions.

mod credentials;
mod email;
pub mod error;
pub mod metrics;
mod oauth;
mod policy;
mod roles;
mod session;
mod token;

pub use credentials::{CredentialManager, SignUpInput};
pub use email::{EmailProvider, EmailService, MockEmailService, SentMail};
pub use error::{ErrorKind, ServiceError};
pub use oauth::{
    GoogleOAuthClient, MockOAuthProvider, OAuthProvider, ProviderProfile, ProviderTokens,
};
pub use policy::Enforcer;
pub use roles::{DomainRoles, RoleGrantInput, RoleService, RoleSummary, UserOverview};
pub use session::SessionManager;
pub use token::{
    ResetClaims, ResetSubject, SessionClaims, SessionSubject, SessionTokenKind, SessionTokens,
    TokenCodec,
};
