use anyhow::{Context, Result};
use async_trait::async_trait;
use overlay_client::{Provider, SearchResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// File the most recent search is kept in, inside the config directory.
pub const CACHE_FILE: &str = ".last-search.json";

/// One row of the last search, numbered the way it was printed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    /// 1-based position in the printed results.
    pub index: usize,
    pub content_hash: String,
    pub filename: String,
    pub size: u64,
    #[serde(default)]
    pub providers: Vec<Provider>,
}

impl CachedResult {
    pub fn from_results(results: &[SearchResult]) -> Vec<Self> {
        results
            .iter()
            .enumerate()
            .map(|(i, r)| Self {
                index: i + 1,
                content_hash: r.content_hash.clone(),
                filename: r.filename.clone(),
                size: r.size,
                providers: r.providers.clone(),
            })
            .collect()
    }
}

/// What `download <n>` resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub content_hash: String,
    pub provider_pub_key: String,
    pub filename: String,
}

/// A result number as typed on the command line. Only plain digits count,
/// and numbering starts at 1.
pub fn parse_index(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<usize>().ok().filter(|&n| n >= 1)
}

/// Persistence for the last search, so later commands can refer to results by number.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Replace whatever was stored before.
    async fn save_results(&self, results: &[SearchResult]) -> Result<()>;

    /// Stored rows. Missing or unreadable data counts as no results.
    async fn load_results(&self) -> Vec<CachedResult>;

    /// Resolve a 1-based result number to its hash and first usable provider.
    /// `None` when the number is out of range or the row has no provider key.
    async fn resolve_target(&self, index: usize) -> Option<DownloadTarget> {
        let rows = self.load_results().await;
        let row = rows.into_iter().find(|r| r.index == index)?;
        let provider = row.providers.iter().find(|p| !p.pub_key.is_empty())?;
        Some(DownloadTarget {
            provider_pub_key: provider.pub_key.clone(),
            content_hash: row.content_hash,
            filename: row.filename,
        })
    }
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at [`CACHE_FILE`] inside `config_dir`.
    pub fn in_dir(config_dir: &Path) -> Self {
        Self::new(config_dir.join(CACHE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultStore for JsonFileStore {
    async fn save_results(&self, results: &[SearchResult]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create search cache directory")?;
        }

        let rows = CachedResult::from_results(results);
        let json = serde_json::to_vec_pretty(&rows)?;
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        tracing::debug!("Cached {} search result(s) to {:?}", rows.len(), self.path);
        Ok(())
    }

    async fn load_results(&self) -> Vec<CachedResult> {
        let bytes = match fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("No search cache at {:?}: {}", self.path, e);
                return Vec::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Ignoring unreadable search cache {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }
}
