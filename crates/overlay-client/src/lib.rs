//! Overlay Client Core - P2P file-sharing overlay library
//!
//! Identity, sessions with bootstrap/indexer/relay nodes, distributed search,
//! provider browsing and verified downloads with progress and cancellation.

pub mod browse;
pub mod cancel;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod handshake;
pub mod keys;
pub mod model;
pub mod peer;
pub mod search;
pub mod session;
pub mod transfer;
pub mod wire;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use client::OverlayClient;
pub use config::ClientConfig;
pub use error::{OverlayError, Result};
pub use keys::{Identity, IdentityInfo};
pub use model::{
    BrowseFile, HealthStatus, NodeRole, Provider, QueryFilters, SearchResult, TransferProgress,
    TransferState,
};
pub use search::{parse_limit, SearchOptions, DEFAULT_SEARCH_LIMIT};
pub use transfer::DownloadOptions;
