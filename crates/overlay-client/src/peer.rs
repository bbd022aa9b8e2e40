//! Reaching one provider, directly or bridged through a relay.

use std::fmt;
use std::time::Duration;

use transport::{DynStream, Endpoint};

use crate::error::{OverlayError, Result};
use crate::handshake::{initiator_handshake, SecureChannel};
use crate::keys::Identity;
use crate::session::Session;
use crate::wire::{self, Request, Response};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerPath {
    Direct(Endpoint),
    Relayed(Endpoint),
}

impl fmt::Display for PeerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(ep) => write!(f, "direct {ep}"),
            Self::Relayed(ep) => write!(f, "via relay {ep}"),
        }
    }
}

/// An authenticated, encrypted conversation with a provider.
pub struct PeerConnection {
    pub stream: DynStream,
    pub channel: SecureChannel,
    pub path: PeerPath,
}

impl PeerConnection {
    pub async fn send(&mut self, request: &Request) -> Result<()> {
        self.channel.send(&mut self.stream, request).await
    }

    /// Next response, or `Timeout` if nothing arrives within `limit`.
    pub async fn recv_within(&mut self, limit: Duration) -> Result<Response> {
        match tokio::time::timeout(limit, self.channel.recv(&mut self.stream)).await {
            Ok(res) => res,
            Err(_) => Err(OverlayError::Timeout(format!("provider {}", self.path))),
        }
    }
}

/// Candidate paths to `pub_key`: direct addresses the bootstraps know of,
/// followed by every reachable relay as a fallback.
pub async fn resolve(session: &Session, pub_key: &str) -> Result<Vec<PeerPath>> {
    let bootstraps = session.bootstraps().await;
    let answers = session
        .fan_out(&bootstraps, session.query_timeout(), |ep| async move {
            let request = Request::Locate {
                pub_key: pub_key.to_string(),
            };
            match session.request(&ep, &request).await? {
                Response::Located(addrs) => Ok(addrs),
                other => Err(other.unexpected("Located")),
            }
        })
        .await;

    let mut paths = Vec::new();
    for (bootstrap, res) in answers {
        match res {
            Ok(addrs) => {
                for raw in addrs {
                    match Endpoint::parse(&raw) {
                        Ok(ep) => {
                            let path = PeerPath::Direct(ep);
                            if !paths.contains(&path) {
                                paths.push(path);
                            }
                        }
                        Err(e) => tracing::debug!("{} gave a bad peer address: {}", bootstrap, e),
                    }
                }
            }
            Err(e) => tracing::debug!("{} could not locate {}: {}", bootstrap, short(pub_key), e),
        }
    }

    paths.extend(session.relays().await.into_iter().map(PeerPath::Relayed));
    if paths.is_empty() {
        return Err(OverlayError::ProviderUnreachable(pub_key.to_string()));
    }
    Ok(paths)
}

/// Try each path in order until one completes the handshake with the
/// expected identity.
pub async fn connect(
    session: &Session,
    identity: &Identity,
    pub_key: &str,
    expected: &[u8; 32],
    paths: &[PeerPath],
) -> Result<PeerConnection> {
    for path in paths {
        let attempt = open(session, identity, pub_key, expected, path);
        match tokio::time::timeout(session.query_timeout(), attempt).await {
            Ok(Ok(conn)) => {
                tracing::debug!("Reached {} {}", short(pub_key), path);
                return Ok(conn);
            }
            Ok(Err(e)) => tracing::debug!("{} {} failed: {}", short(pub_key), path, e),
            Err(_) => tracing::debug!("{} {} timed out", short(pub_key), path),
        }
    }
    Err(OverlayError::ProviderUnreachable(pub_key.to_string()))
}

async fn open(
    session: &Session,
    identity: &Identity,
    pub_key: &str,
    expected: &[u8; 32],
    path: &PeerPath,
) -> Result<PeerConnection> {
    let mut stream = match path {
        PeerPath::Direct(ep) => transport::dial(ep, session.probe_timeout()).await?,
        PeerPath::Relayed(relay) => {
            let mut stream = transport::dial(relay, session.probe_timeout()).await?;
            let request = Request::Bridge {
                pub_key: pub_key.to_string(),
            };
            match wire::call(&mut stream, &request).await? {
                Response::Bridged => stream,
                other => return Err(other.unexpected("Bridged")),
            }
        }
    };

    let channel = initiator_handshake(identity, &mut stream, Some(expected)).await?;
    Ok(PeerConnection {
        stream: transport::boxed(stream),
        channel,
        path: path.clone(),
    })
}

pub(crate) fn short(key: &str) -> &str {
    key.get(..16).unwrap_or(key)
}
