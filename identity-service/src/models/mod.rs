pub mod rbac;
pub mod session;
pub mod subject;
pub mod user;

pub use rbac::{AuthKind, AuthType, Domain, PolicyGrant, Role};
pub use session::{Activation, ResetToken, TokenPair};
pub use subject::{GrantedRole, SubjectFormatError, SubjectRole};
pub use user::{NewUser, User, UserProfile};
