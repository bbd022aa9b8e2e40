//! Connections to bootstrap, indexer and relay nodes.
//!
//! Every multi-node operation fans out one task per node with its own timeout
//! and waits for all of them to settle, so a dead node only costs its own
//! timeout. Nodes are contacted with a fresh connection per request; nothing is
//! held open between operations.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use transport::Endpoint;

use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::error::{OverlayError, Result};
use crate::model::{HealthStatus, NodeRole};
use crate::wire::{self, Request, Response, PROTOCOL_VERSION};

/// Which nodes answered the most recent probe round.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub bootstraps: Vec<Endpoint>,
    pub indexers: Vec<Endpoint>,
    pub relays: Vec<Endpoint>,
}

impl Topology {
    fn health(&self) -> HealthStatus {
        HealthStatus {
            bootstrap: !self.bootstraps.is_empty(),
            indexers: self.indexers.iter().map(ToString::to_string).collect(),
            relays: self.relays.iter().map(ToString::to_string).collect(),
        }
    }
}

pub struct Session {
    bootstrap_nodes: Vec<Endpoint>,
    relay_nodes: Vec<Endpoint>,
    probe_timeout: Duration,
    query_timeout: Duration,
    topology: RwLock<Topology>,
    lifetime: CancelToken,
    closed: AtomicBool,
}

impl Session {
    /// Probe every configured node and build the initial topology.
    ///
    /// Fails with `NetworkUnreachable` when no bootstrap node answers. A session
    /// with bootstraps but neither indexers nor relays is returned in a degraded
    /// state; operations needing those roles fail individually.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let bootstrap_nodes = parse_endpoints(&config.bootstrap_nodes)?;
        let relay_nodes = parse_endpoints(&config.relay_nodes)?;
        if bootstrap_nodes.is_empty() {
            return Err(OverlayError::NetworkUnreachable(
                "no bootstrap nodes configured".into(),
            ));
        }

        let session = Self {
            bootstrap_nodes,
            relay_nodes,
            probe_timeout: config.probe_timeout(),
            query_timeout: config.query_timeout(),
            topology: RwLock::new(Topology::default()),
            lifetime: CancelToken::new(),
            closed: AtomicBool::new(false),
        };

        let topology = session.discover().await;
        if topology.bootstraps.is_empty() {
            return Err(OverlayError::NetworkUnreachable(format!(
                "none of {} bootstrap node(s) answered",
                session.bootstrap_nodes.len()
            )));
        }
        if topology.indexers.is_empty() && topology.relays.is_empty() {
            tracing::warn!("Connected to bootstrap but no indexer or relay is reachable");
        }

        tracing::info!(
            "Session up: {} bootstrap, {} indexer, {} relay node(s) reachable",
            topology.bootstraps.len(),
            topology.indexers.len(),
            topology.relays.len()
        );
        *session.topology.write().await = topology;
        Ok(session)
    }

    /// Re-probe every node. Nothing from earlier probes is reused; the result
    /// also replaces the topology later operations route through.
    pub async fn check_health(&self) -> Result<HealthStatus> {
        self.ensure_open()?;
        let topology = self.discover().await;
        let health = topology.health();
        *self.topology.write().await = topology;
        Ok(health)
    }

    /// Close the session. Safe to call repeatedly and while operations run;
    /// those operations observe the lifetime token and fail with `ShutDown`.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Session shutting down");
            self.lifetime.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(OverlayError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Fires when the session is shut down.
    pub fn lifetime(&self) -> &CancelToken {
        &self.lifetime
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub async fn topology(&self) -> Topology {
        self.topology.read().await.clone()
    }

    /// Reachable indexers; when none are known, try discovering them again
    /// before giving up.
    pub async fn indexers(&self) -> Vec<Endpoint> {
        let known = self.topology.read().await.indexers.clone();
        if !known.is_empty() {
            return known;
        }

        tracing::debug!("No reachable indexers known, rediscovering");
        let bootstraps = self.topology.read().await.bootstraps.clone();
        let fresh = self.probe_indexers(&bootstraps).await;
        self.topology.write().await.indexers = fresh.clone();
        fresh
    }

    pub async fn relays(&self) -> Vec<Endpoint> {
        self.topology.read().await.relays.clone()
    }

    pub async fn bootstraps(&self) -> Vec<Endpoint> {
        self.topology.read().await.bootstraps.clone()
    }

    /// Send one request to one node over a fresh connection.
    pub async fn request(&self, endpoint: &Endpoint, request: &Request) -> Result<Response> {
        let mut stream = transport::dial(endpoint, self.probe_timeout).await?;
        wire::call(&mut stream, request).await
    }

    /// Run `op` against every endpoint concurrently, each bounded by `timeout`.
    /// Results come back in endpoint order once all have settled.
    pub async fn fan_out<T, F, Fut>(
        &self,
        endpoints: &[Endpoint],
        timeout: Duration,
        op: F,
    ) -> Vec<(Endpoint, Result<T>)>
    where
        F: Fn(Endpoint) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let calls = endpoints.iter().cloned().map(|endpoint| {
            let fut = op(endpoint.clone());
            async move {
                let out = match tokio::time::timeout(timeout, fut).await {
                    Ok(out) => out,
                    Err(_) => Err(OverlayError::Timeout(endpoint.to_string())),
                };
                (endpoint, out)
            }
        });
        join_all(calls).await
    }

    /// `Hello`/`Welcome` exchange. The role the node reports is informational;
    /// a node answering at all counts as up.
    async fn probe(&self, endpoint: Endpoint) -> Result<NodeRole> {
        match self.request(&endpoint, &Request::Hello { version: PROTOCOL_VERSION }).await? {
            Response::Welcome { node_id, role } => {
                tracing::trace!("{} is up ({} {})", endpoint, role, node_id);
                Ok(role)
            }
            other => Err(other.unexpected("Welcome")),
        }
    }

    async fn probe_all(&self, endpoints: &[Endpoint]) -> Vec<Endpoint> {
        self.fan_out(endpoints, self.probe_timeout, |ep| self.probe(ep))
            .await
            .into_iter()
            .filter_map(|(endpoint, res)| match res {
                Ok(_) => Some(endpoint),
                Err(e) => {
                    tracing::debug!("{} is down: {}", endpoint, e);
                    None
                }
            })
            .collect()
    }

    /// Ask reachable bootstraps for indexers, then probe those.
    async fn probe_indexers(&self, bootstraps: &[Endpoint]) -> Vec<Endpoint> {
        let answers = self
            .fan_out(bootstraps, self.query_timeout, |ep| async move {
                match self.request(&ep, &Request::ListIndexers).await? {
                    Response::Indexers(list) => Ok(list),
                    other => Err(other.unexpected("Indexers")),
                }
            })
            .await;

        let mut candidates: Vec<Endpoint> = Vec::new();
        for (bootstrap, res) in answers {
            match res {
                Ok(list) => {
                    for raw in list {
                        match Endpoint::parse(&raw) {
                            Ok(ep) if !candidates.contains(&ep) => candidates.push(ep),
                            Ok(_) => {}
                            Err(e) => tracing::warn!("{} listed a bad indexer address: {}", bootstrap, e),
                        }
                    }
                }
                Err(e) => tracing::debug!("{} did not list indexers: {}", bootstrap, e),
            }
        }

        self.probe_all(&candidates).await
    }

    async fn discover(&self) -> Topology {
        let (bootstraps, relays) = tokio::join!(
            self.probe_all(&self.bootstrap_nodes),
            self.probe_all(&self.relay_nodes)
        );
        let indexers = self.probe_indexers(&bootstraps).await;
        Topology {
            bootstraps,
            indexers,
            relays,
        }
    }
}

fn parse_endpoints(raw: &[String]) -> Result<Vec<Endpoint>> {
    let mut out = Vec::with_capacity(raw.len());
    for s in raw {
        let ep = Endpoint::parse(s)?;
        if !out.contains(&ep) {
            out.push(ep);
        }
    }
    Ok(out)
}
