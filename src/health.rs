use std::time::Duration;

use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{instrument, warn};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: ProbeStatus,
    pub database: ProbeStatus,
    pub project: String,
}

/// `SELECT 1` against the store, bounded by `timeout`. Read-only.
pub async fn probe_database(db: &SqlitePool, timeout: Duration) -> ProbeStatus {
    let probe = sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db);
    match tokio::time::timeout(timeout, probe).await {
        Ok(Ok(1)) => ProbeStatus::Ok,
        Ok(Ok(other)) => {
            warn!(value = other, "database probe returned unexpected value");
            ProbeStatus::Error
        }
        Ok(Err(e)) => {
            warn!(error = %e, "database probe failed");
            ProbeStatus::Error
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "database probe timed out");
            ProbeStatus::Error
        }
    }
}

pub async fn check_health(db: &SqlitePool, project: &str, timeout: Duration) -> HealthReport {
    let database = probe_database(db, timeout).await;
    let status = if database == ProbeStatus::Ok {
        ProbeStatus::Ok
    } else {
        ProbeStatus::Error
    };
    HealthReport {
        status,
        database,
        project: project.to_string(),
    }
}

/// Always 200; load balancers read the status from the body.
#[instrument(skip(state))]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = check_health(
        &state.db,
        &state.config.project_name,
        state.config.health_timeout(),
    )
    .await;
    ([(header::CACHE_CONTROL, "no-store")], Json(report))
}
