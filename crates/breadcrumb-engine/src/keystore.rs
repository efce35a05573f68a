//! Identity key storage.
//!
//! The identity seed is read once at initialization and written once when it
//! is first generated. Both backends store the 32-byte Ed25519 seed as
//! lowercase hex.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use breadcrumb_core::Keypair;

use crate::error::{EngineError, Result};

/// Secure storage for the identity keypair.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load the stored keypair, or `None` if none was ever stored.
    ///
    /// Unreadable storage is `KeyUnavailable`; undecodable contents are
    /// `KeyCorrupted`.
    async fn load(&self) -> Result<Option<Keypair>>;

    /// Persist a newly generated keypair.
    async fn store(&self, keypair: &Keypair) -> Result<()>;
}

fn encode_seed(keypair: &Keypair) -> String {
    hex::encode(keypair.seed())
}

fn decode_seed(contents: &str) -> Result<Keypair> {
    let mut seed = [0u8; 32];
    hex::decode_to_slice(contents.trim(), &mut seed)
        .map_err(|e| EngineError::KeyCorrupted(e.to_string()))?;
    Ok(Keypair::from_seed(&seed))
}

/// Keystore held in memory. For tests and ephemeral identities.
#[derive(Default)]
pub struct MemoryKeyStore {
    contents: Mutex<Option<String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A keystore that already holds `keypair`.
    pub fn with_keypair(keypair: &Keypair) -> Self {
        Self::with_contents(encode_seed(keypair))
    }

    /// A keystore holding arbitrary raw contents, valid or not.
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(contents.into())),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>> {
        self.contents
            .lock()
            .map_err(|e| EngineError::KeyUnavailable(format!("keystore lock poisoned: {}", e)))
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load(&self) -> Result<Option<Keypair>> {
        self.lock()?.as_deref().map(decode_seed).transpose()
    }

    async fn store(&self, keypair: &Keypair) -> Result<()> {
        *self.lock()? = Some(encode_seed(keypair));
        Ok(())
    }
}

/// Keystore backed by a single file containing the hex seed.
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load(&self) -> Result<Option<Keypair>> {
        let path = self.path.clone();
        let contents = tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::KeyUnavailable(format!("{}: {}", path.display(), e))),
        })
        .await
        .map_err(|e| EngineError::KeyUnavailable(format!("spawn_blocking failed: {}", e)))??;

        contents.as_deref().map(decode_seed).transpose()
    }

    async fn store(&self, keypair: &Keypair) -> Result<()> {
        let path = self.path.clone();
        let contents = encode_seed(keypair);
        tokio::task::spawn_blocking(move || write_secret(&path, &contents))
            .await
            .map_err(|e| EngineError::KeyUnavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

fn write_secret(path: &Path, contents: &str) -> Result<()> {
    let unavailable = |e: std::io::Error| EngineError::KeyUnavailable(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(unavailable)?;
    }
    std::fs::write(path, contents).map_err(unavailable)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(unavailable)?;
    }

    Ok(())
}
