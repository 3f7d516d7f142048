use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo_types::{ProfileUpdate, User};

/// Login and signup form body.
#[derive(Debug, Deserialize)]
pub struct CredentialsForm {
    pub username: String,
    pub password: String,
}

/// Profile completion form; absent fields are stored as empty.
#[derive(Debug, Default, Deserialize)]
pub struct ProfileForm {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub favorite_service: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub bio: String,
}

impl From<ProfileForm> for ProfileUpdate {
    fn from(f: ProfileForm) -> Self {
        Self {
            first_name: f.first_name.trim().to_string(),
            last_name: f.last_name.trim().to_string(),
            email: f.email.trim().to_string(),
            job_title: f.job_title.trim().to_string(),
            favorite_service: f.favorite_service.trim().to_string(),
            region: f.region.trim().to_string(),
            instance_type: f.instance_type.trim().to_string(),
            bio: f.bio.trim().to_string(),
        }
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
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
    pub profile_complete: bool,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        let profile_complete = u.is_profile_complete();
        Self {
            id: u.id,
            username: u.username,
            created_at: u.created_at,
            first_name: u.first_name,
            last_name: u.last_name,
            email: u.email,
            job_title: u.job_title,
            favorite_service: u.favorite_service,
            region: u.region,
            instance_type: u.instance_type,
            bio: u.bio,
            profile_complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_form_is_trimmed() {
        let form = ProfileForm {
            first_name: "  Alice ".into(),
            email: "alice@example.com\n".into(),
            ..Default::default()
        };
        let update = ProfileUpdate::from(form);
        assert_eq!(update.first_name, "Alice");
        assert_eq!(update.email, "alice@example.com");
        assert_eq!(update.bio, "");
    }

    #[test]
    fn public_user_hides_password_hash() {
        let user = User {
            id: 1,
            username: "alice".into(),
            password_hash: "$argon2id$secret".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            first_name: "Alice".into(),
            last_name: "Liddell".into(),
            email: "alice@example.com".into(),
            job_title: String::new(),
            favorite_service: String::new(),
            region: String::new(),
            instance_type: String::new(),
            bio: String::new(),
        };
        let json = serde_json::to_string(&PublicUser::from(user)).unwrap();
        assert!(json.contains("\"profile_complete\":true"));
        assert!(!json.contains("argon2"));
    }
}
