use anyhow::{Context, Result};
use overlay_client::config::CONFIG_DIR_NAME;
use overlay_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

const DEFAULT_BOOTSTRAP: &str = "http://178.156.232.58:8080";
const DEFAULT_RELAY: &str = "relay://178.156.231.111:9000";

/// Contents of `config.json`. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CliConfig {
    pub bootstrap_nodes: Vec<String>,
    pub relay_nodes: Vec<String>,
    pub default_download_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            bootstrap_nodes: vec![DEFAULT_BOOTSTRAP.to_string()],
            relay_nodes: vec![DEFAULT_RELAY.to_string()],
            default_download_dir: PathBuf::from("."),
            display_name: None,
        }
    }
}

impl CliConfig {
    /// Read `config.json` from `dir`. A missing or unparseable file yields the defaults.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        ensure_dir(dir)?;
        let path = dir.join(CONFIG_FILE);
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Core client settings for a client living in `dir`.
    pub fn client_config(&self, dir: &Path) -> ClientConfig {
        let mut cfg = ClientConfig::new(dir)
            .with_nodes(self.bootstrap_nodes.clone(), self.relay_nodes.clone());
        cfg.display_name = self.display_name.clone();
        cfg
    }
}

/// `~/.softtseek`, or `./.softtseek` when there is no home directory.
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Create `dir` (and parents) readable only by the owner.
#[cfg(unix)]
pub fn ensure_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))
}

#[cfg(not(unix))]
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(CliConfig::load(dir.path()), CliConfig::default());
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"relayNodes": ["relay://10.0.0.1:9000"], "displayName": "ann"}"#,
        )
        .unwrap();

        let cfg = CliConfig::load(dir.path());
        assert_eq!(cfg.bootstrap_nodes, vec![DEFAULT_BOOTSTRAP.to_string()]);
        assert_eq!(cfg.relay_nodes, vec!["relay://10.0.0.1:9000".to_string()]);
        assert_eq!(cfg.display_name.as_deref(), Some("ann"));
    }

    #[test]
    fn test_garbage_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "not json at all").unwrap();
        assert_eq!(CliConfig::load(dir.path()), CliConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("nested").join(".softtseek");
        let cfg = CliConfig {
            display_name: Some("bob".into()),
            ..CliConfig::default()
        };
        cfg.save(&home).unwrap();

        let raw = std::fs::read_to_string(home.join(CONFIG_FILE)).unwrap();
        assert!(raw.contains("\"bootstrapNodes\""));
        assert!(raw.contains("\"defaultDownloadDir\""));
        assert_eq!(CliConfig::load(&home), cfg);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&home).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn test_client_config_carries_nodes_and_name() {
        let cfg = CliConfig {
            display_name: Some("zed".into()),
            ..CliConfig::default()
        };
        let client = cfg.client_config(Path::new("/tmp/x"));
        assert_eq!(client.config_dir, PathBuf::from("/tmp/x"));
        assert_eq!(client.bootstrap_nodes, cfg.bootstrap_nodes);
        assert_eq!(client.relay_nodes, cfg.relay_nodes);
        assert_eq!(client.display_name.as_deref(), Some("zed"));
    }
}
