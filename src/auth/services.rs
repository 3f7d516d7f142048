use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::{
        password::{hash_password, verify_password},
        repo_types::User,
    },
    error::AppError,
    state::AppState,
};

/// Result of a successful [`authenticate`] call.
#[derive(Debug)]
pub enum AuthOutcome {
    /// First sighting of the username; an account was provisioned.
    Created(User),
    Authenticated(User),
}

impl AuthOutcome {
    pub fn user(&self) -> &User {
        match self {
            AuthOutcome::Created(u) | AuthOutcome::Authenticated(u) => u,
        }
    }
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.@-]{1,64}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

fn validate(username: &str, password: &str) -> Result<(), AppError> {
    if !is_valid_username(username) {
        return Err(AppError::Validation(
            "username must be 1-64 letters, digits or _.@-".into(),
        ));
    }
    if password.is_empty() {
        return Err(AppError::Validation("password must not be empty".into()));
    }
    Ok(())
}

async fn hash_blocking(password: &str) -> Result<String, AppError> {
    let plain = password.to_string();
    let hash = tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .context("join hash task")??;
    Ok(hash)
}

async fn verify_blocking(password: &str, hash: &str) -> Result<bool, AppError> {
    let (plain, hash) = (password.to_string(), hash.to_string());
    let ok = tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .context("join verify task")??;
    Ok(ok)
}

async fn check_existing(user: User, password: &str) -> Result<AuthOutcome, AppError> {
    if verify_blocking(password, &user.password_hash).await? {
        info!(user_id = user.id, username = %user.username, "user logged in");
        Ok(AuthOutcome::Authenticated(user))
    } else {
        warn!(user_id = user.id, username = %user.username, "login invalid password");
        Err(AppError::InvalidCredentials)
    }
}

/// Verify `username`/`password`, provisioning the account on first sight when
/// auto-provisioning is on. Stored credentials are never overwritten.
#[instrument(skip(state, password))]
pub async fn authenticate(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<AuthOutcome, AppError> {
    let username = username.trim();
    validate(username, password)?;

    if let Some(user) = User::find_by_username(&state.db, username).await? {
        return check_existing(user, password).await;
    }

    if !state.config.auto_provision {
        warn!(%username, "login unknown username");
        return Err(AppError::InvalidCredentials);
    }

    provision(state, username, password).await
}

/// Insert a fresh account for `username`. If a concurrent first login won
/// the insert, verify against its row instead.
async fn provision(state: &AppState, username: &str, password: &str) -> Result<AuthOutcome, AppError> {
    let hash = hash_blocking(password).await?;
    match User::create_if_absent(&state.db, username, &hash).await? {
        Some(user) => {
            info!(user_id = user.id, username = %user.username, "user provisioned on first login");
            Ok(AuthOutcome::Created(user))
        }
        None => {
            debug!(%username, "lost insert race; verifying existing row");
            let user = User::find_by_username(&state.db, username)
                .await?
                .ok_or_else(|| anyhow::anyhow!("user vanished after insert conflict"))?;
            check_existing(user, password).await
        }
    }
}

/// Explicit registration; fails with `AlreadyExists` instead of logging in.
#[instrument(skip(state, password))]
pub async fn register(state: &AppState, username: &str, password: &str) -> Result<User, AppError> {
    let username = username.trim();
    validate(username, password)?;

    let hash = hash_blocking(password).await?;
    match User::create_if_absent(&state.db, username, &hash).await? {
        Some(user) => {
            info!(user_id = user.id, username = %user.username, "user registered");
            Ok(user)
        }
        None => {
            warn!(%username, "username already registered");
            Err(AppError::AlreadyExists)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rules() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("a.b-c_d@corp"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(&"x".repeat(65)));
    }

    #[tokio::test]
    async fn same_password_twice_succeeds() {
        let state = AppState::fake().await;
        let first = authenticate(&state, "alice", "secret123").await.unwrap();
        assert!(matches!(first, AuthOutcome::Created(_)));
        let second = authenticate(&state, "alice", "secret123").await.unwrap();
        assert!(matches!(second, AuthOutcome::Authenticated(_)));
        assert_eq!(first.user().id, second.user().id);
    }

    #[tokio::test]
    async fn different_password_fails_without_overwrite() {
        let state = AppState::fake().await;
        authenticate(&state, "alice", "secret123").await.unwrap();
        let before = User::find_by_username(&state.db, "alice").await.unwrap().unwrap();

        let err = authenticate(&state, "alice", "wrongpass").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));

        let after = User::find_by_username(&state.db, "alice").await.unwrap().unwrap();
        assert_eq!(before.password_hash, after.password_hash);
        assert!(authenticate(&state, "alice", "secret123").await.is_ok());
    }

    #[tokio::test]
    async fn stored_hash_is_not_plaintext() {
        let state = AppState::fake().await;
        authenticate(&state, "dave", "hunter2").await.unwrap();
        let user = User::find_by_username(&state.db, "dave").await.unwrap().unwrap();
        assert_ne!(user.password_hash, "hunter2");
        assert!(!user.password_hash.is_empty());
    }

    #[tokio::test]
    async fn unknown_user_rejected_when_provisioning_disabled() {
        let state = AppState::fake_with(|c| c.auto_provision = false).await;
        let err = authenticate(&state, "eve", "pw").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        assert!(User::find_by_username(&state.db, "eve").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_input_is_a_validation_error() {
        let state = AppState::fake().await;
        assert!(matches!(
            authenticate(&state, "   ", "pw").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            authenticate(&state, "frank", "").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn register_reports_already_exists() {
        let state = AppState::fake().await;
        register(&state, "grace", "pw1").await.unwrap();
        let err = register(&state, "grace", "pw2").await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists));
        assert!(authenticate(&state, "grace", "pw1").await.is_ok());
    }

    #[tokio::test]
    async fn losing_the_insert_race_verifies_the_winner() {
        let state = AppState::fake().await;
        // The concurrent first login already inserted its row.
        let winner = register(&state, "heidi", "pw-winner").await.unwrap();

        let outcome = provision(&state, "heidi", "pw-winner").await.unwrap();
        assert!(matches!(outcome, AuthOutcome::Authenticated(_)));
        assert_eq!(outcome.user().id, winner.id);

        let err = provision(&state, "heidi", "pw-loser").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        let stored = User::find_by_username(&state.db, "heidi").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, winner.password_hash);
    }

    #[tokio::test]
    async fn concurrent_first_logins_share_one_account() {
        let state = AppState::fake().await;
        let (a, b) = tokio::join!(
            authenticate(&state, "ivan", "pw"),
            authenticate(&state, "ivan", "pw")
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.user().id, b.user().id);
        let created = [&a, &b]
            .iter()
            .filter(|o| matches!(o, AuthOutcome::Created(_)))
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn legacy_row_with_null_profile_can_log_in() {
        let state = AppState::fake().await;
        sqlx::query("DROP TABLE users").execute(&state.db).await.unwrap();
        sqlx::query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, username TEXT NOT NULL UNIQUE, \
             password_hash TEXT NOT NULL, created_at TEXT NOT NULL, first_name TEXT, email TEXT)",
        )
        .execute(&state.db)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO users (username, password_hash, created_at) VALUES ('bob', ?1, '2020-01-01T00:00:00Z')",
        )
        .bind(hash_password("pw").unwrap())
        .execute(&state.db)
        .await
        .unwrap();
        crate::schema::init_store(&state.db).await.unwrap();

        let outcome = authenticate(&state, "bob", "pw").await.unwrap();
        assert!(matches!(outcome, AuthOutcome::Authenticated(_)));
        assert!(!outcome.user().is_profile_complete());
    }
}
