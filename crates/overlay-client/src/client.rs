//! High-level client tying identity, session and the overlay services together.
//!
//! One `OverlayClient` is created per process and passed by reference to
//! whatever needs it. Every public operation races against the client's
//! lifetime, so calling [`OverlayClient::shutdown`] while a search or download
//! is in flight makes that call return `ShutDown` promptly.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use crate::browse;
use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::directory;
use crate::error::{OverlayError, Result};
use crate::keys::Identity;
use crate::model::{BrowseFile, HealthStatus, SearchResult};
use crate::search::{self, SearchOptions};
use crate::session::Session;
use crate::transfer::{DownloadOptions, TransferEngine, TransferRegistry};

pub struct OverlayClient {
    identity: Identity,
    session: Session,
    transfers: TransferRegistry,
    idle_timeout: Duration,
}

impl OverlayClient {
    /// Load (or create) the identity in `config.config_dir` and connect to the
    /// configured bootstrap and relay nodes.
    pub async fn create(config: ClientConfig) -> Result<Self> {
        config.ensure_config_dir()?;
        let mut identity = Identity::load_or_create(&config.config_dir)?;
        if let Some(name) = config.display_name.as_deref() {
            if name != identity.display_name() {
                identity.set_display_name(name)?;
            }
        }

        let session = Session::connect(&config).await?;
        tracing::info!("Overlay client ready as {} ({})", identity.display_name(), identity.fingerprint());

        Ok(Self {
            identity,
            session,
            transfers: TransferRegistry::default(),
            idle_timeout: config.transfer_idle_timeout(),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn set_display_name(&mut self, name: &str) -> Result<()> {
        self.identity.set_display_name(name)
    }

    pub async fn search(
        &self,
        query: &str,
        opts: SearchOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchResult>> {
        self.guard(search::search(&self.session, query, &opts, cancel))
            .await
    }

    /// Public keys of providers currently attached to a relay. `None` when
    /// no relay could be asked.
    pub async fn online_providers(&self) -> Result<Option<HashSet<String>>> {
        self.guard(directory::online_providers(&self.session)).await
    }

    pub async fn browse_provider(&self, pub_key: &str, cancel: &CancelToken) -> Result<Vec<BrowseFile>> {
        self.guard(browse::browse_provider(&self.session, &self.identity, pub_key, cancel))
            .await
    }

    pub async fn download(
        &self,
        content_hash: &str,
        pub_key: &str,
        dest: &Path,
        opts: DownloadOptions,
    ) -> Result<bool> {
        let engine = TransferEngine {
            session: &self.session,
            identity: &self.identity,
            registry: &self.transfers,
            idle_timeout: self.idle_timeout,
        };
        self.guard(engine.download(content_hash, pub_key, dest, opts))
            .await
    }

    pub async fn check_health(&self) -> Result<HealthStatus> {
        self.guard(self.session.check_health()).await
    }

    /// Release the session. Idempotent; in-flight calls fail with `ShutDown`.
    pub fn shutdown(&self) {
        self.session.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.session.is_closed()
    }

    /// Number of downloads currently running.
    pub fn active_transfers(&self) -> usize {
        self.transfers.active()
    }

    async fn guard<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.session.ensure_open()?;
        self.session
            .lifetime()
            .run(op)
            .await
            .unwrap_or(Err(OverlayError::ShutDown))
    }
}
