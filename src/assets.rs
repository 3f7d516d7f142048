//! Downloads from the configured asset directory.

use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    extract::{Path as UrlPath, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{instrument, warn};

use crate::{error::AppError, state::AppState};

/// Directory downloads are confined to.
#[derive(Debug, Clone)]
pub struct AssetRoot {
    dir: PathBuf,
}

impl AssetRoot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Map a requested name to a file inside the root. Anything that could
    /// step outside it is `AssetPathInvalid`; anything absent is
    /// `AssetNotFound`.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, AppError> {
        let requested = Path::new(name);
        if name.is_empty()
            || name.contains('\0')
            || !requested
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            warn!(asset = %name, "rejected asset path");
            return Err(AppError::AssetPathInvalid);
        }

        let root = self.dir.canonicalize().map_err(|e| {
            warn!(error = %e, "asset directory unavailable");
            AppError::AssetNotFound
        })?;
        let resolved = root
            .join(requested)
            .canonicalize()
            .map_err(|_| AppError::AssetNotFound)?;

        // Symlinks may still point elsewhere.
        if !resolved.starts_with(&root) {
            warn!(asset = %name, "asset resolves outside root");
            return Err(AppError::AssetPathInvalid);
        }
        if !resolved.is_file() {
            return Err(AppError::AssetNotFound);
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AssetStats {
    pub name: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AssetSummary {
    Stats(AssetStats),
    Missing { error: String },
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Word statistics for the featured asset shown on the dashboard.
pub async fn asset_stats(root: &AssetRoot, name: &str) -> AssetSummary {
    let missing = || AssetSummary::Missing {
        error: format!("{name} not found."),
    };
    let Ok(path) = root.resolve(name) else {
        return missing();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => AssetSummary::Stats(AssetStats {
            name: name.to_string(),
            word_count: word_count(&String::from_utf8_lossy(&bytes)),
        }),
        Err(e) => {
            warn!(error = %e, asset = %name, "failed to read asset");
            missing()
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/files/*asset", get(download))
}

#[instrument(skip(state, req))]
pub async fn download(
    State(state): State<AppState>,
    UrlPath(asset): UrlPath<String>,
    req: Request,
) -> Result<Response, AppError> {
    let path = state.assets.resolve(&asset)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download")
        .replace('"', "");

    let res = ServeFile::new(&path)
        .oneshot(req)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    if res.status() == StatusCode::NOT_FOUND {
        return Err(AppError::AssetNotFound);
    }

    let mut res = res.map(Body::new).into_response();
    if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\"")) {
        res.headers_mut().insert(header::CONTENT_DISPOSITION, v);
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, AssetRoot) {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        fs::create_dir_all(assets.join("docs")).unwrap();
        fs::write(assets.join("Limerick.txt"), "There once was a man from Peru\n").unwrap();
        fs::write(assets.join("docs/readme.md"), "# hi").unwrap();
        fs::write(dir.path().join("secret.txt"), "top secret").unwrap();
        (dir, AssetRoot::new(assets))
    }

    #[test]
    fn resolves_files_inside_root() {
        let (_dir, root) = fixture();
        assert!(root.resolve("Limerick.txt").unwrap().ends_with("Limerick.txt"));
        assert!(root.resolve("docs/readme.md").is_ok());
    }

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        let (_dir, root) = fixture();
        for bad in ["../secret.txt", "../../etc/passwd", "docs/../../secret.txt", "/etc/passwd", ""] {
            assert!(
                matches!(root.resolve(bad), Err(AppError::AssetPathInvalid)),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn missing_files_and_directories_are_not_found() {
        let (_dir, root) = fixture();
        assert!(matches!(root.resolve("nope.txt"), Err(AppError::AssetNotFound)));
        assert!(matches!(root.resolve("docs"), Err(AppError::AssetNotFound)));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_escaping_root_are_rejected() {
        let (dir, root) = fixture();
        std::os::unix::fs::symlink(
            dir.path().join("secret.txt"),
            dir.path().join("assets/link.txt"),
        )
        .unwrap();
        assert!(matches!(root.resolve("link.txt"), Err(AppError::AssetPathInvalid)));
    }

    #[tokio::test]
    async fn stats_count_words() {
        let (_dir, root) = fixture();
        assert_eq!(
            asset_stats(&root, "Limerick.txt").await,
            AssetSummary::Stats(AssetStats {
                name: "Limerick.txt".into(),
                word_count: 7
            })
        );
        assert!(matches!(
            asset_stats(&root, "gone.txt").await,
            AssetSummary::Missing { .. }
        ));
    }
}
