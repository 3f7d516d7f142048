use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::instrument;

use crate::{
    assets::{asset_stats, AssetSummary},
    auth::{dto::PublicUser, extractors::ProfiledUser},
    health::{check_health, HealthReport},
    metadata::{lookup, MetadataView},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub project: String,
    pub user: PublicUser,
    pub health: HealthReport,
    pub metadata: MetadataView,
    pub featured_asset: AssetSummary,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(dashboard))
}

#[instrument(skip_all, fields(username = %user.username))]
pub async fn dashboard(
    State(state): State<AppState>,
    ProfiledUser(user): ProfiledUser,
) -> Json<DashboardView> {
    let cfg = &state.config;
    let (health, metadata, featured_asset) = tokio::join!(
        check_health(&state.db, &cfg.project_name, cfg.health_timeout()),
        lookup(state.metadata.as_ref(), cfg.metadata.enabled),
        asset_stats(&state.assets, &cfg.featured_asset),
    );
    Json(DashboardView {
        project: cfg.project_name.clone(),
        user: PublicUser::from(user),
        health,
        metadata,
        featured_asset,
    })
}
