//! Authorization scopes, roles, credential origins and grant tuples.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::subject::GrantedRole;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Domain {
    pub id: i64,
    pub uuid: Uuid,
    pub value: String,
    pub name: String,
}

/// A role definition. `domains_id == None` marks a global role.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Role {
    pub id: i64,
    pub uuid: Uuid,
    pub value: String,
    pub name: String,
    pub domains_id: Option<i64>,
    pub users_id: Option<i64>,
}

/// Where a session's credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthKind {
    Local,
    Google,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Local => "LOCAL",
            AuthKind::Google => "GOOGLE",
        }
    }

    pub fn is_federated(&self) -> bool {
        !matches!(self, AuthKind::Local)
    }
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(AuthKind::Local),
            "GOOGLE" => Ok(AuthKind::Google),
            _ => Err(format!("Unknown auth type: {}", s)),
        }
    }
}

/// Auth type row; tokens embed `uuid` rather than the value string.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AuthType {
    pub id: i64,
    pub uuid: Uuid,
    pub value: String,
}

impl AuthType {
    pub fn kind(&self) -> Option<AuthKind> {
        self.value.parse().ok()
    }
}

/// Stored grouping rule `(subject, role, domain)`.
///
/// `role` holds either a bare role id or an encoded [`SubjectRole`](super::SubjectRole);
/// it is decoded into a [`GrantedRole`] before leaving the policy layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, FromRow)]
pub struct PolicyGrant {
    #[sqlx(rename = "v0")]
    pub subject: String,
    #[sqlx(rename = "v1")]
    pub role: String,
    #[sqlx(rename = "v2")]
    pub domain: String,
}

impl PolicyGrant {
    pub fn new(user_id: i64, role: &GrantedRole, domain_id: i64) -> Self {
        Self {
            subject: user_id.to_string(),
            role: role.encode(),
            domain: domain_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_kind_round_trip() {
        assert_eq!("LOCAL".parse::<AuthKind>().unwrap(), AuthKind::Local);
        assert_eq!(AuthKind::Google.to_string(), "GOOGLE");
        assert!("local".parse::<AuthKind>().is_err());
        assert!(AuthKind::Google.is_federated());
        assert!(!AuthKind::Local.is_federated());
    }

    #[test]
    fn test_unknown_auth_type_row_has_no_kind() {
        let row = AuthType {
            id: 9,
            uuid: Uuid::new_v4(),
            value: "SAML".to_string(),
        };
        assert!(row.kind().is_none());
    }
}
