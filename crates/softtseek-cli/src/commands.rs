use anyhow::{Context as _, Result};
use overlay_client::{
    parse_limit, BrowseFile, CancelToken, DownloadOptions, Identity, IdentityInfo, OverlayClient,
    OverlayError, QueryFilters, SearchOptions, SearchResult,
};
use search_cache::{parse_index, JsonFileStore, ResultStore};
use serde::Serialize;
use std::collections::HashSet;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::config::{ensure_dir, CliConfig};
use crate::output::{format_size, is_tty, print_ndjson, print_output, truncate};
use crate::progress::DownloadProgress;

pub const EXIT_OK: u8 = 0;
/// Nothing to show or nothing to act on.
pub const EXIT_EMPTY: u8 = 1;
pub const EXIT_FAILED: u8 = 2;
pub const EXIT_IDENTITY: u8 = 3;
pub const EXIT_CANCELLED: u8 = 130;

/// What every command gets: where state lives and the process-wide cancel token.
pub struct Context {
    pub config_dir: PathBuf,
    pub cancel: CancelToken,
}

/// Connected client, shut down however the command exits.
struct Connected(OverlayClient);

impl Deref for Connected {
    type Target = OverlayClient;

    fn deref(&self) -> &OverlayClient {
        &self.0
    }
}

impl Drop for Connected {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

impl Context {
    async fn connect(&self) -> Result<Connected> {
        let cfg = CliConfig::load(&self.config_dir).client_config(&self.config_dir);
        let client = self
            .cancel
            .run(OverlayClient::create(cfg))
            .await
            .ok_or(OverlayError::Cancelled)?
            .context("Could not join the overlay network")?;
        Ok(Connected(client))
    }
}

pub fn init(ctx: &Context, name: Option<String>) -> Result<u8> {
    let dir = &ctx.config_dir;
    let mut cfg = CliConfig::load(dir);
    ensure_dir(dir)?;

    let mut identity = Identity::load_or_create(dir)?;
    if let Some(name) = name.or_else(|| cfg.display_name.clone()) {
        identity.set_display_name(&name)?;
        cfg.display_name = Some(identity.display_name().to_string());
    }
    cfg.save(dir)?;

    println!("Initialized SoFTTSeek identity");
    println!();
    println!("  Config directory:  {}", dir.display());
    println!("  Public key:        {}", identity.public_key());
    println!("  Fingerprint:       {}", identity.fingerprint());
    println!("  Display name:      {}", identity.display_name());
    println!();
    println!("Bootstrap nodes:     {}", cfg.bootstrap_nodes.join(", "));
    println!("Relay nodes:         {}", cfg.relay_nodes.join(", "));
    Ok(EXIT_OK)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WhoAmI<'a> {
    #[serde(flatten)]
    identity: IdentityInfo,
    config_dir: &'a Path,
}

pub fn whoami(ctx: &Context, json: bool) -> Result<u8> {
    let identity = Identity::load_or_create(&ctx.config_dir)?;
    let view = WhoAmI {
        identity: identity.info(),
        config_dir: &ctx.config_dir,
    };

    let rows = vec![
        vec!["Public Key".to_string(), view.identity.public_key.clone()],
        vec!["Fingerprint".to_string(), view.identity.fingerprint.clone()],
        vec!["Display Name".to_string(), view.identity.display_name.clone()],
        vec!["Config Dir".to_string(), ctx.config_dir.display().to_string()],
    ];
    print_output(&view, &["Field", "Value"], &rows, json)?;
    Ok(EXIT_OK)
}

#[derive(Debug, Default)]
pub struct SearchArgs {
    pub query: String,
    pub limit: String,
    pub ext: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub json: bool,
}

impl SearchArgs {
    fn options(&self) -> SearchOptions {
        let mut filters = QueryFilters::default();
        if let Some(ext) = &self.ext {
            filters = filters.with_extensions(ext.split(',').map(str::trim).filter(|e| !e.is_empty()));
        }
        if let Some(min) = self.min_size {
            filters = filters.with_min_size(min);
        }
        if let Some(max) = self.max_size {
            filters = filters.with_max_size(max);
        }
        SearchOptions::default()
            .with_filters(filters)
            .with_limit(parse_limit(&self.limit))
    }
}

#[derive(Serialize)]
struct SearchLine<'a> {
    #[serde(flatten)]
    result: &'a SearchResult,
    online: Option<bool>,
}

fn any_online(result: &SearchResult, online: &HashSet<String>) -> bool {
    result
        .providers
        .iter()
        .any(|p| !p.pub_key.is_empty() && online.contains(&p.pub_key))
}

pub async fn search(ctx: &Context, args: SearchArgs) -> Result<u8> {
    let client = ctx.connect().await?;
    let results = client.search(&args.query, args.options(), &ctx.cancel).await?;
    if results.is_empty() {
        eprintln!("No results found.");
        return Ok(EXIT_EMPTY);
    }

    let store = JsonFileStore::in_dir(&ctx.config_dir);
    if let Err(e) = store.save_results(&results).await {
        tracing::warn!("Could not cache search results: {:#}", e);
    }

    let online = match ctx.cancel.run(client.online_providers()).await {
        Some(Ok(online)) => online,
        Some(Err(e)) => {
            tracing::debug!("Online status unavailable: {}", e);
            None
        }
        None => return Err(OverlayError::SearchCancelled.into()),
    };

    if args.json {
        let lines: Vec<SearchLine> = results
            .iter()
            .map(|result| SearchLine {
                result,
                online: online.as_ref().map(|set| any_online(result, set)),
            })
            .collect();
        print_ndjson(&lines)?;
        return Ok(EXIT_OK);
    }

    let mut headers = vec!["#", "Filename", "Size", "Ext", "Providers"];
    if online.is_some() {
        headers.push("Online");
    }
    headers.push("Score");

    let rows: Vec<Vec<String>> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut row = vec![
                (i + 1).to_string(),
                truncate(&r.filename),
                format_size(r.size),
                r.ext.clone(),
                r.providers.len().to_string(),
            ];
            if let Some(set) = &online {
                row.push(if any_online(r, set) { "Y" } else { "N" }.to_string());
            }
            row.push(format!("{:.1}", r.score));
            row
        })
        .collect();

    print_output(&results, &headers, &rows, false)?;
    eprintln!(
        "\n{} result(s). Use \"softtseek download <#>\" to download.",
        results.len()
    );
    Ok(EXIT_OK)
}

/// Hash, provider and local file name for a download request.
#[derive(Debug, PartialEq, Eq)]
struct Resolved {
    content_hash: String,
    pub_key: String,
    filename: String,
}

async fn resolve_download(
    store: &impl ResultStore,
    target: &str,
    provider: Option<String>,
) -> std::result::Result<Resolved, String> {
    if !target.is_empty() && target.bytes().all(|b| b.is_ascii_digit()) {
        let found = match parse_index(target) {
            Some(index) => store.resolve_target(index).await,
            None => None,
        };
        return found
            .map(|t| Resolved {
                filename: local_name(&t.filename, &t.content_hash),
                content_hash: t.content_hash,
                pub_key: t.provider_pub_key,
            })
            .ok_or_else(|| {
                format!("No cached search result at index {target}. Run \"softtseek search\" first.")
            });
    }

    match provider {
        Some(pub_key) => Ok(Resolved {
            filename: local_name("", target),
            content_hash: target.to_string(),
            pub_key,
        }),
        None => Err(
            "When downloading by content hash, you must provide <contentHash> <providerPubKey>."
                .to_string(),
        ),
    }
}

/// Last component of `filename`, or the first 16 characters of the hash when
/// there is no usable name.
fn local_name(filename: &str, content_hash: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| content_hash.chars().take(16).collect())
}

fn short(s: &str) -> String {
    s.chars().take(16).collect()
}

pub async fn download(
    ctx: &Context,
    target: String,
    provider: Option<String>,
    dest: Option<PathBuf>,
) -> Result<u8> {
    let store = JsonFileStore::in_dir(&ctx.config_dir);
    let resolved = match resolve_download(&store, &target, provider).await {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("Error: {msg}");
            return Ok(EXIT_EMPTY);
        }
    };

    let dest_dir = dest.unwrap_or_else(|| CliConfig::load(&ctx.config_dir).default_download_dir);
    let mut dest_path = dest_dir.join(&resolved.filename);
    if dest_path.is_relative() {
        dest_path = std::env::current_dir()?.join(dest_path);
    }

    let interactive = is_tty();
    if interactive {
        eprintln!("Downloading: {}", resolved.filename);
        eprintln!("  Hash:     {}...", short(&resolved.content_hash));
        eprintln!("  Provider: {}...", short(&resolved.pub_key));
        eprintln!("  Dest:     {}", dest_path.display());
        eprintln!();
    }

    let client = ctx.connect().await?;
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = DownloadProgress::new(interactive, &resolved.filename).spawn(rx);
    let opts = DownloadOptions::default()
        .with_progress(tx)
        .with_cancel(ctx.cancel.child());

    let outcome = client
        .download(&resolved.content_hash, &resolved.pub_key, &dest_path, opts)
        .await;
    let progress = reporter.await?;

    match outcome {
        Ok(true) => {
            progress.finish();
            if interactive {
                eprintln!("Download complete: {}", dest_path.display());
            } else {
                let path = dest_path.display().to_string();
                println!("{}", serde_json::json!({ "success": true, "path": path }));
            }
            Ok(EXIT_OK)
        }
        Ok(false) => {
            progress.abandon();
            eprintln!("Error: Download failed. The provider does not have this file.");
            Ok(EXIT_FAILED)
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

pub async fn browse(ctx: &Context, pub_key: String, json: bool) -> Result<u8> {
    let client = ctx.connect().await?;
    let files: Vec<BrowseFile> = client.browse_provider(&pub_key, &ctx.cancel).await?;
    if files.is_empty() {
        eprintln!("No files shared by this provider.");
        return Ok(EXIT_EMPTY);
    }

    let rows: Vec<Vec<String>> = files
        .iter()
        .enumerate()
        .map(|(i, f)| {
            vec![
                (i + 1).to_string(),
                truncate(&f.path),
                format_size(f.size),
                f.ext.clone(),
                format!("{}...", f.content_hash.chars().take(12).collect::<String>()),
            ]
        })
        .collect();
    print_output(&files, &["#", "Path", "Size", "Ext", "Hash"], &rows, json)?;

    if !json {
        eprintln!("\n{} file(s) from provider {}...", files.len(), short(&pub_key));
    }
    Ok(EXIT_OK)
}

fn role_row(name: &str, nodes: &[String]) -> Vec<String> {
    if nodes.is_empty() {
        vec![name.to_string(), "DOWN".to_string(), "none reachable".to_string()]
    } else {
        vec![
            name.to_string(),
            "OK".to_string(),
            format!("{} online ({})", nodes.len(), nodes.join(", ")),
        ]
    }
}

pub async fn status(ctx: &Context, json: bool) -> Result<u8> {
    let client = ctx.connect().await?;
    let health = ctx
        .cancel
        .run(client.check_health())
        .await
        .ok_or(OverlayError::Cancelled)??;

    let bootstrap = if health.bootstrap {
        vec!["Bootstrap".to_string(), "OK".to_string(), "reachable".to_string()]
    } else {
        vec!["Bootstrap".to_string(), "DOWN".to_string(), "unreachable".to_string()]
    };
    let rows = vec![
        bootstrap,
        role_row("Indexers", &health.indexers),
        role_row("Relays", &health.relays),
    ];
    print_output(&health, &["Component", "Status", "Details"], &rows, json)?;

    Ok(if health.is_healthy() { EXIT_OK } else { EXIT_FAILED })
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_client::Provider;
    use tempfile::TempDir;

    fn hit(hash: &str, name: &str, providers: &[&str]) -> SearchResult {
        SearchResult {
            content_hash: hash.to_string(),
            filename: name.to_string(),
            size: 1,
            ext: String::new(),
            providers: providers.iter().map(|p| Provider::new(*p)).collect(),
            score: 0.0,
        }
    }

    #[test]
    fn test_search_args_build_filters() {
        let args = SearchArgs {
            query: "x".into(),
            limit: "nope".into(),
            ext: Some("MP3, flac,,".into()),
            min_size: Some(10),
            max_size: None,
            json: false,
        };
        let opts = args.options();
        assert_eq!(opts.effective_limit(), 25);
        let filters = opts.filters.unwrap();
        let exts: Vec<&str> = filters.ext.as_ref().unwrap().iter().map(String::as_str).collect();
        assert_eq!(exts, vec!["flac", "mp3"]);
        assert_eq!(filters.min_size, Some(10));
        assert_eq!(filters.max_size, None);
    }

    #[test]
    fn test_search_args_without_filters() {
        let args = SearchArgs {
            limit: "3".into(),
            ..SearchArgs::default()
        };
        let opts = args.options();
        assert!(opts.filters.is_none());
        assert_eq!(opts.effective_limit(), 3);
    }

    #[test]
    fn test_any_online_ignores_empty_keys() {
        let online: HashSet<String> = ["P2".to_string(), String::new()].into_iter().collect();
        assert!(any_online(&hit("h", "a", &["P1", "P2"]), &online));
        assert!(!any_online(&hit("h", "a", &["", "P3"]), &online));
    }

    #[test]
    fn test_search_line_json_shape() {
        let result = hit("h1", "a.mp3", &["P1"]);
        let line = SearchLine {
            result: &result,
            online: None,
        };
        let v = serde_json::to_value(&line).unwrap();
        assert_eq!(v["contentHash"], "h1");
        assert!(v["online"].is_null());
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name("music/a.mp3", "abc"), "a.mp3");
        assert_eq!(local_name("", "0123456789abcdef0123"), "0123456789abcdef");
        assert_eq!(local_name("..", "feed"), "feed");
    }

    #[tokio::test]
    async fn test_resolve_download_by_index() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        store
            .save_results(&[hit("h1", "dir/one.mp3", &["", "P1"])])
            .await
            .unwrap();

        let r = resolve_download(&store, "1", None).await.unwrap();
        assert_eq!(
            r,
            Resolved {
                content_hash: "h1".into(),
                pub_key: "P1".into(),
                filename: "one.mp3".into(),
            }
        );
        assert!(resolve_download(&store, "2", None).await.is_err());
        assert!(resolve_download(&store, "0", None).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_download_by_hash_needs_provider() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        let hash = "ab".repeat(32);

        assert!(resolve_download(&store, &hash, None).await.is_err());
        let r = resolve_download(&store, &hash, Some("PK".into())).await.unwrap();
        assert_eq!(r.content_hash, hash);
        assert_eq!(r.pub_key, "PK");
        assert_eq!(r.filename, "abababababababab");
    }

    #[test]
    fn test_init_and_whoami_share_identity() {
        let dir = TempDir::new().unwrap();
        let ctx = Context {
            config_dir: dir.path().join(".softtseek"),
            cancel: CancelToken::new(),
        };

        assert_eq!(init(&ctx, Some("  alice ".into())).unwrap(), EXIT_OK);
        let cfg = CliConfig::load(&ctx.config_dir);
        assert_eq!(cfg.display_name.as_deref(), Some("alice"));

        let identity = Identity::load(&ctx.config_dir).unwrap();
        assert_eq!(identity.display_name(), "alice");
        assert_eq!(whoami(&ctx, true).unwrap(), EXIT_OK);
        assert_eq!(Identity::load(&ctx.config_dir).unwrap().public_key(), identity.public_key());
    }

    #[test]
    fn test_role_row() {
        assert_eq!(role_row("Relays", &[])[1], "DOWN");
        let row = role_row("Indexers", &["tcp://a:1".into(), "tcp://b:2".into()]);
        assert_eq!(row[2], "2 online (tcp://a:1, tcp://b:2)");
    }
}
