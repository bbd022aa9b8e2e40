//! Values exchanged with indexers, relays and providers, and handed to callers.
//!
//! These types travel over the wire with bincode, so no field may be skipped
//! conditionally during serialization.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A peer offering a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    #[serde(default)]
    pub pub_key: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl Provider {
    pub fn new(pub_key: impl Into<String>) -> Self {
        Self {
            pub_key: pub_key.into(),
            username: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// One file found by a search, identified by its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(alias = "id")]
    pub content_hash: String,
    pub filename: String,
    pub size: u64,
    pub ext: String,
    pub providers: Vec<Provider>,
    pub score: f64,
}

/// An entry in a provider's published listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseFile {
    pub path: String,
    pub size: u64,
    pub ext: String,
    pub content_hash: String,
}

/// Narrowing applied to merged search results. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilters {
    #[serde(default)]
    pub ext: Option<BTreeSet<String>>,
    #[serde(default)]
    pub min_size: Option<u64>,
    #[serde(default)]
    pub max_size: Option<u64>,
}

impl QueryFilters {
    /// Restrict to the given extensions; case and leading dots are ignored.
    pub fn with_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = exts
            .into_iter()
            .map(|e| normalize_ext(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self.ext = if set.is_empty() { None } else { Some(set) };
        self
    }

    pub fn with_min_size(mut self, bytes: u64) -> Self {
        self.min_size = Some(bytes);
        self
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ext.is_none() && self.min_size.is_none() && self.max_size.is_none()
    }

    pub fn matches(&self, result: &SearchResult) -> bool {
        if let Some(exts) = &self.ext {
            if !exts.contains(&normalize_ext(&result.ext)) {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if result.size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if result.size > max {
                return false;
            }
        }
        true
    }
}

/// Phases of a download. `Complete`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Resolving,
    Connecting,
    Transferring,
    Verifying,
    Complete,
    Failed,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::Transferring => "transferring",
            Self::Verifying => "verifying",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub status: TransferState,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
}

/// Reachability snapshot from one health check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub bootstrap: bool,
    pub indexers: Vec<String>,
    pub relays: Vec<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.bootstrap && !self.indexers.is_empty() && !self.relays.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Bootstrap,
    Indexer,
    Relay,
    Provider,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bootstrap => "bootstrap",
            Self::Indexer => "indexer",
            Self::Relay => "relay",
            Self::Provider => "provider",
        };
        f.write_str(s)
    }
}

/// Lowercase, without a leading dot.
pub fn normalize_ext(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Extension of a file name or path, normalized. Empty when there is none.
pub fn ext_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_ext)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(size: u64, ext: &str) -> SearchResult {
        SearchResult {
            content_hash: "h".into(),
            filename: format!("f.{ext}"),
            size,
            ext: ext.into(),
            providers: vec![Provider::new("P1")],
            score: 1.0,
        }
    }

    #[test]
    fn test_ext_helpers() {
        assert_eq!(normalize_ext(".MP3"), "mp3");
        assert_eq!(ext_of("Album/Track 01.FLAC"), "flac");
        assert_eq!(ext_of("README"), "");
    }

    #[test]
    fn test_filters_size_bounds_inclusive() {
        let f = QueryFilters::default().with_min_size(100).with_max_size(200);
        assert!(f.matches(&result(100, "txt")));
        assert!(f.matches(&result(200, "txt")));
        assert!(!f.matches(&result(99, "txt")));
        assert!(!f.matches(&result(201, "txt")));
    }

    #[test]
    fn test_filters_extension_set() {
        let f = QueryFilters::default().with_extensions([".MP3", "flac"]);
        assert!(f.matches(&result(1, "mp3")));
        assert!(f.matches(&result(1, "FLAC")));
        assert!(!f.matches(&result(1, "txt")));
    }

    #[test]
    fn test_empty_extension_list_is_no_filter() {
        let f = QueryFilters::default().with_extensions(Vec::<String>::new());
        assert!(f.is_empty());
        assert!(f.matches(&result(1, "anything")));
    }

    #[test]
    fn test_search_result_json_shape() {
        let json = serde_json::to_value(result(5, "txt")).unwrap();
        assert!(json.get("contentHash").is_some());
        assert_eq!(json["providers"][0]["pubKey"], "P1");

        let parsed: SearchResult = serde_json::from_str(
            r#"{"id":"abc","filename":"a.txt","size":1,"ext":"txt","providers":[{"pubKey":"P"}],"score":2}"#,
        )
        .unwrap();
        assert_eq!(parsed.content_hash, "abc");
        assert_eq!(parsed.providers[0].username, None);
    }

    #[test]
    fn test_progress_json_shape() {
        let p = TransferProgress {
            status: TransferState::Transferring,
            bytes_downloaded: 10,
            total_bytes: 20,
        };
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(
            json,
            r#"{"status":"transferring","bytesDownloaded":10,"totalBytes":20}"#
        );
    }
}
