use std::{sync::Arc, time::Duration};

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::{
    assets::AssetRoot,
    auth::session::SessionKeys,
    config::{AppConfig, MetadataConfig, SessionConfig, DEFAULT_METADATA_BASE_URL},
    db,
    metadata::{DisabledMetadata, ImdsClient, MetadataClient},
    schema,
};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub metadata: Arc<dyn MetadataClient>,
    pub assets: AssetRoot,
    pub sessions: Arc<SessionKeys>,
}

impl AppState {
    /// Open the store and bring its schema up to date. A migration failure
    /// aborts startup.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let db = db::connect(&config.database_path).await?;
        let report = schema::init_store(&db).await?;
        info!(table = %report.table, added = ?report.added, "schema ready");

        let metadata = if config.metadata.enabled {
            Arc::new(ImdsClient::new(
                &config.metadata.base_url,
                Duration::from_millis(config.metadata.timeout_ms),
            )?) as Arc<dyn MetadataClient>
        } else {
            Arc::new(DisabledMetadata) as Arc<dyn MetadataClient>
        };

        Ok(Self::from_parts(db, Arc::new(config), metadata))
    }

    pub fn from_parts(
        db: SqlitePool,
        config: Arc<AppConfig>,
        metadata: Arc<dyn MetadataClient>,
    ) -> Self {
        let assets = AssetRoot::new(config.assets_dir.clone());
        let sessions = Arc::new(SessionKeys::from(&config.session));
        Self {
            db,
            config,
            metadata,
            assets,
            sessions,
        }
    }

    pub fn test_config() -> AppConfig {
        AppConfig {
            project_name: "test-project".into(),
            database_path: ":memory:".into(),
            assets_dir: "assets".into(),
            featured_asset: "Limerick.txt".into(),
            session: SessionConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            metadata: MetadataConfig {
                enabled: false,
                base_url: DEFAULT_METADATA_BASE_URL.into(),
                timeout_ms: 200,
            },
            health_timeout_ms: 500,
            auto_provision: true,
        }
    }

    /// Migrated in-memory store with test settings.
    pub async fn fake() -> Self {
        Self::fake_with(|_| {}).await
    }

    pub async fn fake_with(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = Self::test_config();
        tweak(&mut config);

        // One connection: every `:memory:` connection is its own database.
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        schema::init_store(&db).await.expect("migrate in-memory store");

        Self::from_parts(db, Arc::new(config), Arc::new(DisabledMetadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MigrationError;

    #[tokio::test]
    async fn init_fails_when_store_path_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let mut config = AppState::test_config();
        config.database_path = blocker.join("sub/store.db");
        assert!(AppState::init(config).await.is_err());
    }

    #[tokio::test]
    async fn init_fails_on_conflicting_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let db = db::connect(&path).await.unwrap();
        sqlx::query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT, password_hash TEXT, \
             created_at TEXT, region INTEGER)",
        )
        .execute(&db)
        .await
        .unwrap();
        db.close().await;

        let mut config = AppState::test_config();
        config.database_path = path.clone();
        let err = match AppState::init(config).await {
            Ok(_) => panic!("init accepted a conflicting schema"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<MigrationError>(),
            Some(MigrationError::TypeConflict { column, .. }) if column == "region"
        ));

        let db = db::connect(&path).await.unwrap();
        let live = schema::live_columns(&db, schema::USERS_TABLE).await.unwrap();
        assert_eq!(live.len(), 5);
    }

    #[tokio::test]
    async fn session_keys_are_built_once_per_state() {
        let state = AppState::fake().await;
        let copy = state.clone();
        assert!(Arc::ptr_eq(&state.sessions, &copy.sessions));
        let token = state.sessions.issue("alice").unwrap();
        assert_eq!(copy.sessions.verify(&token).unwrap().sub, "alice");
    }
}
