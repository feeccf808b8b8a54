pub mod identity;
pub mod metrics;

pub use identity::{
    require_roles, require_subject_role, user_identity, user_identity_logout, Identity, RoleMatch,
};
pub use metrics::metrics_middleware;
