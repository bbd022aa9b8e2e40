use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use crate::error::{OverlayError, Result};

pub const KEY_FILE: &str = "identity.key";
pub const PROFILE_FILE: &str = "profile.json";

/// Bytes of SHA-256(public key) shown in a fingerprint.
const FINGERPRINT_BYTES: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    display_name: String,
}

/// Identity wrapper for the Ed25519 keypair this client is known by.
///
/// The secret key lives in `<config_dir>/identity.key` (32 raw bytes); the
/// display name lives next to it in `profile.json`.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    display_name: String,
    dir: PathBuf,
}

/// Plain view of an identity for display and JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityInfo {
    pub public_key: String,
    pub fingerprint: String,
    pub display_name: String,
}

impl Identity {
    /// Load the identity stored in `config_dir`, creating one if no key exists.
    ///
    /// A key file that exists but cannot be parsed is reported as
    /// `IdentityCorrupt`; it is never overwritten, since a new key would orphan
    /// everything shared under the old one.
    pub fn load_or_create(config_dir: &Path) -> Result<Self> {
        if config_dir.join(KEY_FILE).exists() {
            Self::load(config_dir)
        } else {
            Self::generate_and_store(config_dir)
        }
    }

    /// Generate a new keypair and persist it to `config_dir`.
    pub fn generate_and_store(config_dir: &Path) -> Result<Self> {
        let signing_key = SigningKey::generate(&mut OsRng);
        fs::create_dir_all(config_dir)?;

        let key_path = config_dir.join(KEY_FILE);
        write_secret(&key_path, &signing_key.to_bytes())?;

        let display_name = default_display_name(&signing_key.verifying_key());
        let identity = Self {
            signing_key,
            display_name,
            dir: config_dir.to_path_buf(),
        };
        identity.write_profile()?;

        tracing::info!("Generated new identity {} at {:?}", identity.fingerprint(), key_path);
        Ok(identity)
    }

    /// Load an existing identity from `config_dir`.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let key_path = config_dir.join(KEY_FILE);
        let data = Zeroizing::new(fs::read(&key_path).map_err(|e| corrupt(&key_path, e))?);
        if data.len() != 32 {
            return Err(corrupt(
                &key_path,
                format!("expected 32 bytes, got {}", data.len()),
            ));
        }
        let mut key_bytes = Zeroizing::new([0u8; 32]);
        key_bytes.copy_from_slice(&data);
        let signing_key = SigningKey::from_bytes(&key_bytes);

        let profile_path = config_dir.join(PROFILE_FILE);
        let display_name = match fs::read_to_string(&profile_path) {
            Ok(raw) => {
                let profile: Profile =
                    serde_json::from_str(&raw).map_err(|e| corrupt(&profile_path, e))?;
                profile.display_name
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                default_display_name(&signing_key.verifying_key())
            }
            Err(e) => return Err(corrupt(&profile_path, e)),
        };

        let identity = Self {
            signing_key,
            display_name,
            dir: config_dir.to_path_buf(),
        };
        tracing::debug!("Loaded identity {} from {:?}", identity.fingerprint(), key_path);
        Ok(identity)
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hex-encoded public key; this is the identifier other peers use.
    pub fn public_key(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.public_key_bytes())
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_display_name(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OverlayError::InvalidDisplayName(name.to_string()));
        }
        self.display_name = name.to_string();
        self.write_profile()
    }

    pub fn info(&self) -> IdentityInfo {
        IdentityInfo {
            public_key: self.public_key(),
            fingerprint: self.fingerprint(),
            display_name: self.display_name.clone(),
        }
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }

    /// Verify a signature by a public key.
    pub fn verify_with_pubkey(
        pubkey: &[u8; 32],
        msg: &[u8],
        sig: &Signature,
    ) -> std::result::Result<(), ed25519_dalek::SignatureError> {
        let pk = VerifyingKey::from_bytes(pubkey)?;
        pk.verify(msg, sig)
    }

    fn write_profile(&self) -> Result<()> {
        let profile = Profile {
            display_name: self.display_name.clone(),
        };
        let json = serde_json::to_string_pretty(&profile)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(self.dir.join(PROFILE_FILE), json + "\n")?;
        Ok(())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key())
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Short display digest of a public key: the first 8 bytes of its SHA-256,
/// hex, in groups of four.
pub fn fingerprint_of(pubkey: &[u8; 32]) -> String {
    let digest = Sha256::digest(pubkey);
    let hex = hex::encode(&digest[..FINGERPRINT_BYTES]);
    hex.as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a hex public key as used on the wire and in search results.
pub fn parse_public_key(hex_key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|_| OverlayError::InvalidPublicKey(hex_key.to_string()))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| OverlayError::InvalidPublicKey(hex_key.to_string()))?;
    VerifyingKey::from_bytes(&key).map_err(|_| OverlayError::InvalidPublicKey(hex_key.to_string()))?;
    Ok(key)
}

fn default_display_name(key: &VerifyingKey) -> String {
    let fp = fingerprint_of(&key.to_bytes()).replace(':', "");
    format!("anon-{}", &fp[..8])
}

fn corrupt(path: &Path, reason: impl std::fmt::Display) -> OverlayError {
    OverlayError::IdentityCorrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(unix)]
fn write_secret(path: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_secret(path: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::write(path, bytes)
}
