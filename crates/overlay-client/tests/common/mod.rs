//! In-process overlay nodes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use overlay_client::handshake::responder_handshake;
use overlay_client::model::ext_of;
use overlay_client::wire::{self, Request, Response, WireError};
use overlay_client::{BrowseFile, ClientConfig, Identity, NodeRole, Provider, SearchResult};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub role: NodeRole,
    pub indexers: Vec<String>,
    pub locations: HashMap<String, Vec<String>>,
    pub results: Vec<SearchResult>,
    pub search_delay: Duration,
    pub online: Vec<String>,
    pub bridges: HashMap<String, SocketAddr>,
}

impl NodeSpec {
    fn new(role: NodeRole) -> Self {
        Self {
            role,
            indexers: Vec::new(),
            locations: HashMap::new(),
            results: Vec::new(),
            search_delay: Duration::ZERO,
            online: Vec::new(),
            bridges: HashMap::new(),
        }
    }

    pub fn bootstrap(indexers: &[&MockNode]) -> Self {
        let mut spec = Self::new(NodeRole::Bootstrap);
        spec.indexers = indexers.iter().map(|n| n.url("tcp")).collect();
        spec
    }

    pub fn indexer(results: Vec<SearchResult>) -> Self {
        let mut spec = Self::new(NodeRole::Indexer);
        spec.results = results;
        spec
    }

    pub fn relay() -> Self {
        Self::new(NodeRole::Relay)
    }

    pub fn locate(mut self, pub_key: &str, addrs: Vec<String>) -> Self {
        self.locations.insert(pub_key.to_string(), addrs);
        self
    }

    pub fn online(mut self, peers: &[&str]) -> Self {
        self.online = peers.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn bridge(mut self, provider: &MockProvider) -> Self {
        self.bridges.insert(provider.pub_key.clone(), provider.addr);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.search_delay = delay;
        self
    }
}

pub struct MockNode {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl MockNode {
    pub fn url(&self, scheme: &str) -> String {
        format!("{scheme}://{}", self.addr)
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn spawn_node(spec: NodeSpec) -> MockNode {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let spec = Arc::new(spec);

    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let spec = spec.clone();
            tokio::spawn(async move {
                let _ = serve_node(spec, stream, addr).await;
            });
        }
    });
    MockNode { addr, task }
}

async fn serve_node(
    spec: Arc<NodeSpec>,
    mut stream: TcpStream,
    addr: SocketAddr,
) -> overlay_client::Result<()> {
    loop {
        let request: Request = wire::recv(&mut stream).await?;
        let response = match request {
            Request::Hello { .. } => Response::Welcome {
                node_id: format!("{}@{}", spec.role, addr),
                role: spec.role,
            },
            Request::ListIndexers => Response::Indexers(spec.indexers.clone()),
            Request::Locate { pub_key } => {
                Response::Located(spec.locations.get(&pub_key).cloned().unwrap_or_default())
            }
            Request::Search { .. } => {
                tokio::time::sleep(spec.search_delay).await;
                Response::Results(spec.results.clone())
            }
            Request::OnlinePeers => Response::Online(spec.online.clone()),
            Request::Bridge { pub_key } => match spec.bridges.get(&pub_key) {
                Some(target) => {
                    let mut upstream = TcpStream::connect(target).await?;
                    wire::send(&mut stream, &Response::Bridged).await?;
                    tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
                    return Ok(());
                }
                None => Response::Error(WireError::NotFound),
            },
            _ => Response::Error(WireError::Unsupported),
        };
        wire::send(&mut stream, &response).await?;
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub files: Vec<(String, Vec<u8>)>,
    pub corrupt: bool,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    /// Complete the handshake, then never answer.
    pub silent: bool,
}

impl ProviderSpec {
    pub fn with_files(files: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            files: files.into_iter().map(|(p, b)| (p.to_string(), b)).collect(),
            corrupt: false,
            chunk_size: 16 * 1024,
            chunk_delay: Duration::ZERO,
            silent: false,
        }
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn corrupted(mut self) -> Self {
        self.corrupt = true;
        self
    }

    pub fn slow(mut self, chunk_size: usize, delay: Duration) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_delay = delay;
        self
    }
}

pub struct MockProvider {
    pub addr: SocketAddr,
    pub pub_key: String,
    pub listing: Vec<BrowseFile>,
    _dir: TempDir,
    task: JoinHandle<()>,
}

impl MockProvider {
    pub fn url(&self) -> String {
        format!("overlay://{}", self.addr)
    }

    pub fn hash_of(&self, path: &str) -> String {
        self.listing
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.content_hash.clone())
            .unwrap()
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub async fn spawn_provider(spec: ProviderSpec) -> MockProvider {
    let dir = TempDir::new().unwrap();
    let identity = Identity::load_or_create(dir.path()).unwrap();
    let pub_key = identity.public_key();

    let listing: Vec<BrowseFile> = spec
        .files
        .iter()
        .map(|(path, bytes)| BrowseFile {
            path: path.clone(),
            size: bytes.len() as u64,
            ext: ext_of(path),
            content_hash: sha256_hex(bytes),
        })
        .collect();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let spec = Arc::new(spec);
    let shared_listing = Arc::new(listing.clone());

    let task = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let identity = identity.clone();
            let spec = spec.clone();
            let listing = shared_listing.clone();
            tokio::spawn(async move {
                let _ = serve_provider(identity, spec, listing, stream).await;
            });
        }
    });

    MockProvider {
        addr,
        pub_key,
        listing,
        _dir: dir,
        task,
    }
}

async fn serve_provider(
    identity: Identity,
    spec: Arc<ProviderSpec>,
    listing: Arc<Vec<BrowseFile>>,
    mut stream: TcpStream,
) -> overlay_client::Result<()> {
    let channel = responder_handshake(&identity, &mut stream).await?;
    if spec.silent {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        return Ok(());
    }
    loop {
        let request: Request = channel.recv(&mut stream).await?;
        match request {
            Request::Browse => {
                channel
                    .send(&mut stream, &Response::Listing(listing.to_vec()))
                    .await?
            }
            Request::Fetch { content_hash } => {
                let found = listing
                    .iter()
                    .position(|f| f.content_hash == content_hash)
                    .map(|i| spec.files[i].1.clone());
                let Some(mut bytes) = found else {
                    channel
                        .send(&mut stream, &Response::Error(WireError::NotFound))
                        .await?;
                    continue;
                };
                if spec.corrupt && !bytes.is_empty() {
                    bytes[0] ^= 0xff;
                }
                channel
                    .send(&mut stream, &Response::FileHeader { size: bytes.len() as u64 })
                    .await?;
                for chunk in bytes.chunks(spec.chunk_size) {
                    if !spec.chunk_delay.is_zero() {
                        tokio::time::sleep(spec.chunk_delay).await;
                    }
                    channel
                        .send(&mut stream, &Response::Chunk(chunk.to_vec()))
                        .await?;
                }
                channel.send(&mut stream, &Response::End).await?;
            }
            _ => {
                channel
                    .send(&mut stream, &Response::Error(WireError::Unsupported))
                    .await?
            }
        }
    }
}

/// An address nothing listens on.
pub async fn dead_endpoint(scheme: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("{scheme}://{addr}")
}

pub fn client_config(dir: &Path, bootstraps: Vec<String>, relays: Vec<String>) -> ClientConfig {
    let mut cfg = ClientConfig::new(dir)
        .with_nodes(bootstraps, relays)
        .with_timeouts(Duration::from_millis(500), Duration::from_secs(2));
    cfg.transfer_idle_timeout_ms = 5_000;
    cfg
}

pub fn hit(hash: &str, filename: &str, size: u64, provider: &str, score: f64) -> SearchResult {
    SearchResult {
        content_hash: hash.to_string(),
        filename: filename.to_string(),
        size,
        ext: ext_of(filename),
        providers: vec![Provider::new(provider)],
        score,
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
