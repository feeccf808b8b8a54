use sqlx::FromRow;
use uuid::Uuid;

/// The single live access/refresh pair of a user.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TokenPair {
    pub id: i64,
    pub users_id: i64,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResetToken {
    pub id: i64,
    pub users_id: i64,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Activation {
    pub id: i64,
    pub users_id: i64,
    pub link: Uuid,
    pub is_activated: bool,
}
