//! Subject-scoped role identifiers.
//!
//! A role granted on one object instance is stored as `"<roleId>;<objectUuid>"`.
//! The string form exists only in storage; everything above the policy layer
//! works with [`SubjectRole`] / [`GrantedRole`].
//!
//! The object segment is checked for length only (at least 36 characters).
//! It is a cheap shape guard, not UUID validation.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const SEPARATOR: char = ';';
pub const OBJECT_UUID_LEN: usize = 36;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubjectFormatError {
    #[error("subject role must have exactly two ';'-separated fields, got {0}")]
    FieldCount(usize),

    #[error("object uuid must be at least 36 characters, got {0}")]
    ShortObjectUuid(usize),

    #[error("role id is not an integer: {0:?}")]
    RoleId(String),
}

/// A role id bound to one object instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectRole {
    pub role_id: i64,
    pub object_uuid: String,
}

impl SubjectRole {
    pub fn new(role_id: i64, object_uuid: impl Into<String>) -> Self {
        Self {
            role_id,
            object_uuid: object_uuid.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}{}{}", self.role_id, SEPARATOR, self.object_uuid)
    }

    pub fn decode(raw: &str) -> Result<Self, SubjectFormatError> {
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        let [role, object] = parts.as_slice() else {
            return Err(SubjectFormatError::FieldCount(parts.len()));
        };

        if object.len() < OBJECT_UUID_LEN {
            return Err(SubjectFormatError::ShortObjectUuid(object.len()));
        }

        let role_id = role
            .parse::<i64>()
            .map_err(|_| SubjectFormatError::RoleId((*role).to_string()))?;

        Ok(Self::new(role_id, *object))
    }
}

impl fmt::Display for SubjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for SubjectRole {
    type Err = SubjectFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Decoded role half of a grant: a plain role or a subject-scoped one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrantedRole {
    Role(i64),
    Subject(SubjectRole),
}

impl GrantedRole {
    pub fn role_id(&self) -> i64 {
        match self {
            GrantedRole::Role(id) => *id,
            GrantedRole::Subject(subject) => subject.role_id,
        }
    }

    /// Object the grant is scoped to, if any.
    pub fn object_uuid(&self) -> Option<&str> {
        match self {
            GrantedRole::Role(_) => None,
            GrantedRole::Subject(subject) => Some(&subject.object_uuid),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            GrantedRole::Role(id) => id.to_string(),
            GrantedRole::Subject(subject) => subject.encode(),
        }
    }

    pub fn decode(raw: &str) -> Result<Self, SubjectFormatError> {
        if raw.contains(SEPARATOR) {
            return SubjectRole::decode(raw).map(GrantedRole::Subject);
        }
        raw.parse::<i64>()
            .map(GrantedRole::Role)
            .map_err(|_| SubjectFormatError::RoleId(raw.to_string()))
    }
}

impl From<SubjectRole> for GrantedRole {
    fn from(subject: SubjectRole) -> Self {
        GrantedRole::Subject(subject)
    }
}
