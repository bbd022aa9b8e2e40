//! Overlay wire protocol.
//!
//! Every message is a u32 big-endian length prefix followed by a bincode
//! encoded [`Request`] or [`Response`]. Node conversations (bootstrap, indexer,
//! relay) use plain frames; provider conversations run the same messages
//! through the encrypted channel from [`crate::handshake`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{OverlayError, Result};
use crate::model::{BrowseFile, NodeRole, QueryFilters, SearchResult};

pub const PROTOCOL_VERSION: u16 = 1;

/// Upper bound on a single frame, checked before allocating.
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Liveness probe answered with `Welcome`.
    Hello { version: u16 },
    /// Ask a bootstrap node for the indexers it knows.
    ListIndexers,
    /// Ask a bootstrap node for a peer's direct addresses.
    Locate { pub_key: String },
    Search {
        query: String,
        filters: QueryFilters,
        limit: u32,
    },
    /// Ask a relay which peers are currently attached to it.
    OnlinePeers,
    /// Ask a relay to splice this connection onto a peer. On `Bridged` the
    /// socket carries raw bytes to and from that peer.
    Bridge { pub_key: String },
    /// Provider: published file listing.
    Browse,
    /// Provider: stream the file with this content hash.
    Fetch { content_hash: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Welcome { node_id: String, role: NodeRole },
    Indexers(Vec<String>),
    Located(Vec<String>),
    Results(Vec<SearchResult>),
    Online(Vec<String>),
    Bridged,
    Listing(Vec<BrowseFile>),
    FileHeader { size: u64 },
    Chunk(Vec<u8>),
    End,
    Error(WireError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireError {
    NotFound,
    Unsupported,
    Unavailable(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
            Self::Unsupported => f.write_str("unsupported request"),
            Self::Unavailable(why) => write!(f, "unavailable: {why}"),
        }
    }
}

impl Response {
    /// Short tag for protocol error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "Welcome",
            Self::Indexers(_) => "Indexers",
            Self::Located(_) => "Located",
            Self::Results(_) => "Results",
            Self::Online(_) => "Online",
            Self::Bridged => "Bridged",
            Self::Listing(_) => "Listing",
            Self::FileHeader { .. } => "FileHeader",
            Self::Chunk(_) => "Chunk",
            Self::End => "End",
            Self::Error(_) => "Error",
        }
    }

    pub(crate) fn unexpected(&self, wanted: &str) -> OverlayError {
        match self {
            Self::Error(e) => OverlayError::Protocol(format!("peer answered {wanted} with error: {e}")),
            other => OverlayError::Protocol(format!("expected {wanted}, got {}", other.kind())),
        }
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<T>(transport: &mut T, data: &[u8]) -> std::io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
{
    if data.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "frame too large",
        ));
    }
    transport.write_all(&(data.len() as u32).to_be_bytes()).await?;
    transport.write_all(data).await?;
    transport.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_frame<T>(transport: &mut T) -> std::io::Result<Vec<u8>>
where
    T: AsyncRead + Unpin + Send,
{
    let mut lenb = [0u8; 4];
    transport.read_exact(&mut lenb).await?;
    let len = u32::from_be_bytes(lenb) as usize;

    // Sanity check to prevent memory exhaustion
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }

    let mut buf = vec![0u8; len];
    transport.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn send<T, M>(transport: &mut T, msg: &M) -> Result<()>
where
    T: AsyncWrite + Unpin + Send,
    M: Serialize,
{
    let bytes = bincode::serialize(msg)?;
    write_frame(transport, &bytes).await?;
    Ok(())
}

pub async fn recv<T, M>(transport: &mut T) -> Result<M>
where
    T: AsyncRead + Unpin + Send,
    M: DeserializeOwned,
{
    let bytes = read_frame(transport).await?;
    Ok(bincode::deserialize(&bytes)?)
}

/// One request, one response.
pub async fn call<T>(transport: &mut T, request: &Request) -> Result<Response>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    send(transport, request).await?;
    recv(transport).await
}
