//! Verified downloads.
//!
//! A download moves through `Resolving → Connecting → Transferring → Verifying`
//! and ends `Complete`, `Failed` or `Cancelled`. Bytes land in a temporary file
//! next to the destination and are renamed into place only after their SHA-256
//! matches the requested content hash. On every other exit the temporary file
//! is removed, so the destination never holds partial or corrupt data.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::error::{OverlayError, Result};
use crate::keys::{parse_public_key, Identity};
use crate::model::{TransferProgress, TransferState};
use crate::peer::{self, PeerConnection};
use crate::session::Session;
use crate::wire::{Request, Response, WireError};

const TEMP_PREFIX: &str = ".softtseek-";
const TEMP_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Receives a snapshot on every state change and chunk. Unbounded so a slow
    /// consumer never stalls the transfer.
    pub progress: Option<mpsc::UnboundedSender<TransferProgress>>,
    pub cancel: CancelToken,
}

impl DownloadOptions {
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<TransferProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Lowercased content hash, or `InvalidContentHash` unless it is 64 hex digits.
pub fn validate_content_hash(hash: &str) -> Result<String> {
    let hash = hash.trim();
    if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(hash.to_ascii_lowercase())
    } else {
        Err(OverlayError::InvalidContentHash(hash.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransferKey {
    content_hash: String,
    provider: String,
    dest: PathBuf,
}

/// Downloads currently running on one client.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    active: DashMap<TransferKey, ()>,
}

impl TransferRegistry {
    pub fn active(&self) -> usize {
        self.active.len()
    }

    fn claim(&self, key: TransferKey) -> Result<TransferClaim<'_>> {
        match self.active.entry(key.clone()) {
            Entry::Occupied(_) => Err(OverlayError::TransferInProgress(key.content_hash)),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(TransferClaim {
                    registry: self,
                    key,
                })
            }
        }
    }
}

struct TransferClaim<'a> {
    registry: &'a TransferRegistry,
    key: TransferKey,
}

impl Drop for TransferClaim<'_> {
    fn drop(&mut self) {
        self.registry.active.remove(&self.key);
    }
}

struct Reporter {
    tx: Option<mpsc::UnboundedSender<TransferProgress>>,
    current: TransferProgress,
}

impl Reporter {
    fn new(tx: Option<mpsc::UnboundedSender<TransferProgress>>) -> Self {
        Self {
            tx,
            current: TransferProgress {
                status: TransferState::Resolving,
                bytes_downloaded: 0,
                total_bytes: 0,
            },
        }
    }

    fn state(&mut self, status: TransferState) {
        self.current.status = status;
        self.emit();
    }

    fn begin(&mut self, total: u64) {
        self.current.total_bytes = total;
        self.state(TransferState::Transferring);
    }

    fn advance(&mut self, n: u64) {
        self.current.bytes_downloaded += n;
        self.emit();
    }

    fn bytes(&self) -> u64 {
        self.current.bytes_downloaded
    }

    fn emit(&self) {
        if let Some(tx) = &self.tx {
            // A consumer that went away does not stop the download.
            let _ = tx.send(self.current);
        }
    }
}

fn parent_dir(dest: &Path) -> PathBuf {
    match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Absolute form of `dest`, so `./a.bin` and `a.bin` name the same target.
/// The parent is canonicalized when it already exists.
async fn resolve_dest(dest: &Path) -> Result<PathBuf> {
    let Some(name) = dest.file_name() else {
        return Err(OverlayError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} does not name a file", dest.display()),
        )));
    };
    let parent = parent_dir(dest);
    let parent = match tokio::fs::canonicalize(&parent).await {
        Ok(p) => p,
        Err(_) => std::path::absolute(&parent)?,
    };
    Ok(parent.join(name))
}

/// Temporary file in the destination's directory, deleted on drop unless persisted.
struct Staging {
    temp: NamedTempFile,
}

impl Staging {
    async fn create(dest: &Path) -> Result<Self> {
        let parent = parent_dir(dest);
        tokio::fs::create_dir_all(&parent).await?;
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&parent)?;
        Ok(Self { temp })
    }

    fn writer(&self) -> Result<tokio::fs::File> {
        Ok(tokio::fs::File::from_std(self.temp.as_file().try_clone()?))
    }

    fn persist(self, dest: &Path) -> Result<()> {
        self.temp.persist(dest).map_err(|e| OverlayError::Io(e.error))?;
        Ok(())
    }
}

pub struct TransferEngine<'a> {
    pub session: &'a Session,
    pub identity: &'a Identity,
    pub registry: &'a TransferRegistry,
    pub idle_timeout: Duration,
}

impl TransferEngine<'_> {
    /// Download `content_hash` from `pub_key` into `dest`.
    ///
    /// `Ok(true)` only when the file is complete and verified. `Ok(false)` when
    /// the provider does not have the content. Cancellation, integrity failures
    /// and unreachable providers are errors.
    pub async fn download(
        &self,
        content_hash: &str,
        pub_key: &str,
        dest: &Path,
        opts: DownloadOptions,
    ) -> Result<bool> {
        let content_hash = validate_content_hash(content_hash)?;
        let expected_key = parse_public_key(pub_key)?;
        let dest = resolve_dest(dest).await?;
        let _claim = self.registry.claim(TransferKey {
            content_hash: content_hash.clone(),
            provider: pub_key.to_string(),
            dest: dest.clone(),
        })?;

        let mut reporter = Reporter::new(opts.progress);
        let outcome = opts
            .cancel
            .run(self.run(&content_hash, pub_key, &expected_key, &dest, &mut reporter))
            .await;

        match outcome {
            Some(Ok(true)) => Ok(true),
            Some(Ok(false)) => {
                reporter.state(TransferState::Failed);
                Ok(false)
            }
            Some(Err(e)) => {
                tracing::warn!("Download of {} failed: {}", content_hash, e);
                reporter.state(TransferState::Failed);
                Err(e)
            }
            None => {
                tracing::info!("Download of {} cancelled", content_hash);
                reporter.state(TransferState::Cancelled);
                Err(OverlayError::TransferCancelled)
            }
        }
    }

    async fn run(
        &self,
        content_hash: &str,
        pub_key: &str,
        expected_key: &[u8; 32],
        dest: &Path,
        reporter: &mut Reporter,
    ) -> Result<bool> {
        reporter.state(TransferState::Resolving);
        let paths = peer::resolve(self.session, pub_key).await?;

        reporter.state(TransferState::Connecting);
        let mut conn =
            peer::connect(self.session, self.identity, pub_key, expected_key, &paths).await?;
        conn.send(&Request::Fetch {
            content_hash: content_hash.to_string(),
        })
        .await?;

        let total = match self.next(&mut conn).await? {
            Response::FileHeader { size } => size,
            Response::Error(WireError::NotFound) => {
                tracing::warn!("{} does not have {}", peer::short(pub_key), content_hash);
                return Ok(false);
            }
            other => return Err(other.unexpected("FileHeader")),
        };

        let staging = Staging::create(dest).await?;
        let mut file = staging.writer()?;
        let mut hasher = Sha256::new();
        reporter.begin(total);

        loop {
            match self.next(&mut conn).await? {
                Response::Chunk(bytes) => {
                    let len = bytes.len() as u64;
                    if reporter.bytes() + len > total {
                        return Err(OverlayError::TransferFailed(format!(
                            "provider sent more than the announced {total} bytes"
                        )));
                    }
                    hasher.update(&bytes);
                    file.write_all(&bytes).await?;
                    reporter.advance(len);
                }
                Response::End => break,
                Response::Error(e) => {
                    return Err(OverlayError::TransferFailed(format!("provider aborted: {e}")))
                }
                other => return Err(other.unexpected("Chunk")),
            }
        }

        if reporter.bytes() != total {
            return Err(OverlayError::TransferFailed(format!(
                "stream ended after {} of {total} bytes",
                reporter.bytes()
            )));
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        reporter.state(TransferState::Verifying);
        let actual = hex::encode(hasher.finalize());
        if actual != content_hash {
            return Err(OverlayError::HashMismatch {
                expected: content_hash.to_string(),
                actual,
            });
        }

        staging.persist(dest)?;
        reporter.state(TransferState::Complete);
        tracing::info!("Downloaded {} ({} bytes) to {:?}", content_hash, total, dest);
        Ok(true)
    }

    async fn next(&self, conn: &mut PeerConnection) -> Result<Response> {
        conn.recv_within(self.idle_timeout).await
    }
}
