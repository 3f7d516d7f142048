use std::path::PathBuf;
use std::time::Duration;

use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_PROJECT_NAME: &str = "Nimbus Nexus: EC2 Onboarding Portal";
pub const DEFAULT_METADATA_BASE_URL: &str = "http://169.254.169.254/latest/meta-data";
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 60 * 12;
pub const MAX_SESSION_TTL_MINUTES: i64 = 60 * 24 * 30;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub project_name: String,
    pub database_path: PathBuf,
    pub assets_dir: PathBuf,
    pub featured_asset: String,
    pub session: SessionConfig,
    pub metadata: MetadataConfig,
    pub health_timeout_ms: u64,
    /// Unknown usernames get an account on first login.
    pub auto_provision: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let session = SessionConfig {
            secret: match std::env::var("SESSION_SECRET") {
                Ok(s) if !s.trim().is_empty() => s,
                _ => {
                    warn!("SESSION_SECRET not set; sessions will not survive a restart");
                    random_secret()
                }
            },
            issuer: std::env::var("SESSION_ISSUER").unwrap_or_else(|_| "nimbus".into()),
            audience: std::env::var("SESSION_AUDIENCE").unwrap_or_else(|_| "nimbus-portal".into()),
            ttl_minutes: parse_ttl_minutes(std::env::var("SESSION_TTL_MINUTES").ok().as_deref()),
        };
        let metadata = MetadataConfig {
            enabled: std::env::var("AWS_METADATA_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            base_url: std::env::var("METADATA_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_METADATA_BASE_URL.into()),
            timeout_ms: std::env::var("METADATA_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(200),
        };
        Ok(Self {
            project_name: std::env::var("PROJECT_NAME")
                .unwrap_or_else(|_| DEFAULT_PROJECT_NAME.into()),
            database_path: std::env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("database.db")),
            assets_dir: std::env::var("ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("assets")),
            featured_asset: std::env::var("FEATURED_ASSET")
                .unwrap_or_else(|_| "Limerick.txt".into()),
            session,
            metadata,
            health_timeout_ms: std::env::var("HEALTH_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(500),
            auto_provision: std::env::var("AUTO_PROVISION")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
        })
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

/// `0`, `false`, `no` and `off` disable a flag; anything else enables it.
pub fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Unset, unparsable or non-positive values fall back to the default; large
/// ones are capped at thirty days.
fn parse_ttl_minutes(raw: Option<&str>) -> i64 {
    match raw.and_then(|v| v.trim().parse::<i64>().ok()) {
        Some(v) if v > MAX_SESSION_TTL_MINUTES => {
            warn!(requested = v, max = MAX_SESSION_TTL_MINUTES, "SESSION_TTL_MINUTES capped");
            MAX_SESSION_TTL_MINUTES
        }
        Some(v) if v > 0 => v,
        _ => DEFAULT_SESSION_TTL_MINUTES,
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert!(!parse_flag("0"));
        assert!(!parse_flag("False"));
        assert!(!parse_flag(" off "));
        assert!(parse_flag("1"));
        assert!(parse_flag("yes"));
    }

    #[test]
    fn session_ttl_is_bounded() {
        assert_eq!(parse_ttl_minutes(None), DEFAULT_SESSION_TTL_MINUTES);
        assert_eq!(parse_ttl_minutes(Some("abc")), DEFAULT_SESSION_TTL_MINUTES);
        assert_eq!(parse_ttl_minutes(Some("-5")), DEFAULT_SESSION_TTL_MINUTES);
        assert_eq!(parse_ttl_minutes(Some(" 30 ")), 30);
        assert_eq!(
            parse_ttl_minutes(Some("9223372036854775807")),
            MAX_SESSION_TTL_MINUTES
        );
    }

    #[test]
    fn random_secrets_differ() {
        let a = random_secret();
        let b = random_secret();
        assert_eq!(a.len(), 48);
        assert_ne!(a, b);
    }
}
