use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the credential store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // argon2 PHC string, never exposed
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub job_title: String,
    pub favorite_service: String,
    pub region: String,
    pub instance_type: String,
    pub bio: String,
}

impl User {
    /// The dashboard needs a name and a contact address.
    pub fn is_profile_complete(&self) -> bool {
        [&self.first_name, &self.last_name, &self.email]
            .iter()
            .all(|f| !f.trim().is_empty())
    }
}

/// Editable profile fields, already trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub job_title: String,
    pub favorite_service: String,
    pub region: String,
    pub instance_type: String,
    pub bio: String,
}
