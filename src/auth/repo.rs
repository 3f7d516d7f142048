use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::auth::repo_types::{ProfileUpdate, User};
use crate::db::with_retry;

// Profile columns may be NULL in rows written before they were NOT NULL.
const USER_COLUMNS: &str = "id, username, password_hash, created_at, \
     COALESCE(first_name, '') AS first_name, \
     COALESCE(last_name, '') AS last_name, \
     COALESCE(email, '') AS email, \
     COALESCE(job_title, '') AS job_title, \
     COALESCE(favorite_service, '') AS favorite_service, \
     COALESCE(region, '') AS region, \
     COALESCE(instance_type, '') AS instance_type, \
     COALESCE(bio, '') AS bio";

impl User {
    /// Find a user by exact username.
    pub async fn find_by_username(db: &SqlitePool, username: &str) -> Result<Option<User>, sqlx::Error> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
        with_retry("find_by_username", || {
            sqlx::query_as::<_, User>(&sql)
                .bind(username)
                .fetch_optional(db)
        })
        .await
    }

    /// Insert a user unless the username is taken. `None` means another row
    /// already owns it.
    pub async fn create_if_absent(
        db: &SqlitePool,
        username: &str,
        password_hash: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let sql = format!(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(username) DO NOTHING RETURNING {USER_COLUMNS}"
        );
        let now = OffsetDateTime::now_utc();
        with_retry("create_user", || {
            sqlx::query_as::<_, User>(&sql)
                .bind(username)
                .bind(password_hash)
                .bind(now)
                .fetch_optional(db)
        })
        .await
    }

    /// Overwrite the profile fields of `username`. Returns the updated row.
    pub async fn update_profile(
        db: &SqlitePool,
        username: &str,
        p: &ProfileUpdate,
    ) -> Result<Option<User>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE users
               SET first_name = ?1,
                   last_name = ?2,
                   email = ?3,
                   job_title = ?4,
                   favorite_service = ?5,
                   region = ?6,
                   instance_type = ?7,
                   bio = ?8
             WHERE username = ?9
            RETURNING {USER_COLUMNS}
            "#
        );
        with_retry("update_profile", || {
            sqlx::query_as::<_, User>(&sql)
                .bind(&p.first_name)
                .bind(&p.last_name)
                .bind(&p.email)
                .bind(&p.job_title)
                .bind(&p.favorite_service)
                .bind(&p.region)
                .bind(&p.instance_type)
                .bind(&p.bio)
                .bind(username)
                .fetch_optional(db)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schema, state::AppState};

    #[tokio::test]
    async fn create_is_idempotent_on_username() {
        let state = AppState::fake().await;
        let first = User::create_if_absent(&state.db, "alice", "hash-1").await.unwrap();
        assert!(first.is_some());
        let second = User::create_if_absent(&state.db, "alice", "hash-2").await.unwrap();
        assert!(second.is_none());

        let stored = User::find_by_username(&state.db, "alice").await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash-1");
        assert!(!stored.is_profile_complete());
    }

    #[tokio::test]
    async fn usernames_are_case_sensitive() {
        let state = AppState::fake().await;
        User::create_if_absent(&state.db, "Alice", "h").await.unwrap();
        assert!(User::find_by_username(&state.db, "alice").await.unwrap().is_none());
        assert!(User::find_by_username(&state.db, "Alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_profile_completes_user() {
        let state = AppState::fake().await;
        User::create_if_absent(&state.db, "carol", "h").await.unwrap();
        let update = ProfileUpdate {
            first_name: "Carol".into(),
            last_name: "Danvers".into(),
            email: "carol@example.com".into(),
            region: "eu-west-1".into(),
            ..Default::default()
        };
        let user = User::update_profile(&state.db, "carol", &update)
            .await
            .unwrap()
            .expect("row updated");
        assert!(user.is_profile_complete());
        assert_eq!(user.region, "eu-west-1");
        assert_eq!(user.bio, "");

        let missing = User::update_profile(&state.db, "nobody", &update).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn null_profile_columns_read_as_empty() {
        let state = AppState::fake().await;
        // Older stores declared the profile columns without NOT NULL.
        sqlx::query("DROP TABLE users").execute(&state.db).await.unwrap();
        sqlx::query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, username TEXT NOT NULL UNIQUE, \
             password_hash TEXT NOT NULL, created_at TEXT NOT NULL, first_name TEXT, email TEXT)",
        )
        .execute(&state.db)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO users (username, password_hash, created_at) \
             VALUES ('bob', 'h', '2020-01-01T00:00:00Z')",
        )
        .execute(&state.db)
        .await
        .unwrap();
        schema::init_store(&state.db).await.unwrap();

        let bob = User::find_by_username(&state.db, "bob")
            .await
            .expect("NULL profile columns decode")
            .unwrap();
        assert_eq!(bob.first_name, "");
        assert_eq!(bob.email, "");
        assert!(!bob.is_profile_complete());
    }
}
