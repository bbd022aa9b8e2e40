use clap::{Parser, Subcommand};
use overlay_client::{CancelToken, OverlayError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;
mod output;
mod progress;

use commands::{Context, SearchArgs, EXIT_CANCELLED, EXIT_FAILED, EXIT_IDENTITY};

#[derive(Parser, Debug)]
#[command(name = "softtseek", version, about = "CLI for the SoFTTSeek P2P file-sharing network")]
struct Cli {
    /// Set log level: error,warn,info,debug,trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Directory holding identity, config.json and the last search
    #[arg(long, global = true, env = "SOFTTSEEK_HOME")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize identity and configuration directory
    Init {
        /// Display name for this identity
        #[arg(long)]
        name: Option<String>,
    },

    /// Show current identity (public key, fingerprint, display name)
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search the overlay network for files
    Search {
        /// Search terms
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Maximum results to return
        #[arg(short = 'l', long, default_value = "25", allow_hyphen_values = true)]
        limit: String,

        /// Filter by file extension (comma-separated, e.g. mp3,flac)
        #[arg(long)]
        ext: Option<String>,

        /// Minimum file size in bytes
        #[arg(long)]
        min_size: Option<u64>,

        /// Maximum file size in bytes
        #[arg(long)]
        max_size: Option<u64>,

        /// Output as NDJSON
        #[arg(long)]
        json: bool,
    },

    /// Download a file by result number from the last search, or by <contentHash> <providerPubKey>
    Download {
        /// Result number or content hash
        target: String,

        /// Provider public key (required with a content hash)
        provider: Option<String>,

        /// Destination directory
        #[arg(short = 'd', long)]
        dest: Option<PathBuf>,
    },

    /// List a provider's shared files
    Browse {
        /// Provider public key (hex)
        pubkey: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check overlay network health
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Prefix for error messages and the exit code a failure maps to.
    fn failure(&self) -> (&'static str, u8) {
        match self {
            Self::Init { .. } => ("Failed to initialize", EXIT_IDENTITY),
            Self::Whoami { .. } => ("Failed to read identity", EXIT_IDENTITY),
            Self::Search { .. } => ("Search failed", EXIT_FAILED),
            Self::Download { .. } => ("Download failed", EXIT_FAILED),
            Self::Browse { .. } => ("Browse failed", EXIT_FAILED),
            Self::Status { .. } => ("Health check failed", EXIT_FAILED),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = Context {
        config_dir: cli.config_dir.unwrap_or_else(config::default_config_dir),
        cancel: CancelToken::new(),
    };
    spawn_signal_handler(ctx.cancel.clone());

    let (what, failure_code) = cli.cmd.failure();
    let outcome = match cli.cmd {
        Commands::Init { name } => commands::init(&ctx, name),
        Commands::Whoami { json } => commands::whoami(&ctx, json),
        Commands::Search {
            query,
            limit,
            ext,
            min_size,
            max_size,
            json,
        } => {
            let args = SearchArgs {
                query: query.join(" "),
                limit,
                ext,
                min_size,
                max_size,
                json,
            };
            commands::search(&ctx, args).await
        }
        Commands::Download {
            target,
            provider,
            dest,
        } => commands::download(&ctx, target, provider, dest).await,
        Commands::Browse { pubkey, json } => commands::browse(&ctx, pubkey, json).await,
        Commands::Status { json } => commands::status(&ctx, json).await,
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(e) if ctx.cancel.is_cancelled() || is_cancellation(&e) => {
            eprintln!("Cancelled.");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            tracing::debug!("{:?}", e);
            eprintln!("Error: {what} - {e:#}");
            ExitCode::from(failure_code)
        }
    }
}

fn is_cancellation(e: &anyhow::Error) -> bool {
    e.chain()
        .filter_map(|cause| cause.downcast_ref::<OverlayError>())
        .any(OverlayError::is_cancellation)
}

/// Ctrl-C or SIGTERM cancels everything in flight; commands then shut their
/// client down on the way out.
fn spawn_signal_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Interrupted, cancelling");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::debug!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from([
            "softtseek", "search", "daft", "punk", "-l", "5", "--ext", "mp3,flac", "--json",
        ])
        .unwrap();
        match cli.cmd {
            Commands::Search {
                query, limit, ext, json, ..
            } => {
                assert_eq!(query.join(" "), "daft punk");
                assert_eq!(limit, "5");
                assert_eq!(ext.as_deref(), Some("mp3,flac"));
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn test_cli_accepts_negative_limit() {
        let cli = Cli::try_parse_from(["softtseek", "search", "x", "-l", "-3"]).unwrap();
        let Commands::Search { limit, .. } = cli.cmd else {
            panic!("expected search");
        };
        assert_eq!(overlay_client::parse_limit(&limit), 25);
    }

    #[test]
    fn test_cli_parses_download_forms() {
        let cli = Cli::try_parse_from(["softtseek", "download", "3", "-d", "/tmp"]).unwrap();
        let Commands::Download { target, provider, dest } = cli.cmd else {
            panic!("expected download");
        };
        assert_eq!(target, "3");
        assert!(provider.is_none());
        assert_eq!(dest, Some(PathBuf::from("/tmp")));

        let cli = Cli::try_parse_from([
            "softtseek", "--config-dir", "/x", "download", "abcd", "PK",
        ])
        .unwrap();
        assert_eq!(cli.config_dir, Some(PathBuf::from("/x")));
        let Commands::Download { provider, .. } = cli.cmd else {
            panic!("expected download");
        };
        assert_eq!(provider.as_deref(), Some("PK"));
    }

    #[test]
    fn test_failure_codes() {
        assert_eq!(Commands::Init { name: None }.failure().1, EXIT_IDENTITY);
        assert_eq!(Commands::Status { json: false }.failure().1, EXIT_FAILED);
    }

    #[test]
    fn test_cancellation_detected_through_context() {
        let err = anyhow::Error::new(OverlayError::TransferCancelled).context("Download");
        assert!(is_cancellation(&err));
        let err = anyhow::Error::new(OverlayError::HashMismatch {
            expected: "a".into(),
            actual: "b".into(),
        });
        assert!(!is_cancellation(&err));
    }
}
