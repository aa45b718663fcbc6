//! Credential store implementations
//!
//! The client core does not own persistent storage; it reads and writes the
//! token pair through the [`CredentialStore`] trait. A file-backed store is
//! provided for the CLI, and an in-memory store for tests and embedders that
//! bring their own persistence.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::token::TokenPair;
use crate::constants::{auth, env as env_constants};
use crate::errors::{CredentialError, CredentialResult};

/// External credential storage consumed by the auth lifecycle manager.
///
/// Implementations must be callable from concurrent tasks; every method is a
/// complete read or write of the stored token state.
pub trait CredentialStore: Send + Sync {
    /// Currently stored access token, if any
    fn get_access_token(&self) -> CredentialResult<Option<String>>;

    /// Currently stored refresh token, if any
    fn get_refresh_token(&self) -> CredentialResult<Option<String>>;

    /// Stored expiry for the access token
    fn get_token_expiry(&self) -> CredentialResult<Option<DateTime<Utc>>>;

    /// Persist a full token pair, replacing any previous one
    fn store_tokens(&self, tokens: &TokenPair) -> CredentialResult<()>;

    /// Remove all stored session state
    fn clear_all(&self) -> CredentialResult<()>;
}

/// Load the full stored pair through any store, or `None` when no session
/// is persisted
pub fn load_token_pair(store: &dyn CredentialStore) -> CredentialResult<Option<TokenPair>> {
    let Some(access) = store.get_access_token()? else {
        return Ok(None);
    };
    Ok(Some(TokenPair::new(
        access,
        store.get_refresh_token()?,
        store.get_token_expiry()?,
    )))
}

/// On-disk credential file contents
#[derive(Debug, Serialize, Deserialize, Default)]
struct CredentialFile {
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expiry: Option<DateTime<Utc>>,
    session_start: Option<DateTime<Utc>>,
}

/// File-backed credential store under the platform config directory.
///
/// The file is written with owner-only permissions on Unix.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Create a store at the default platform location, honoring the
    /// `PATABIMA_CREDENTIAL_FILE` override
    pub fn new() -> CredentialResult<Self> {
        if let Ok(path) = std::env::var(env_constants::CREDENTIAL_FILE) {
            return Ok(Self { path: path.into() });
        }
        let dir = dirs::config_dir()
            .ok_or(CredentialError::NoStorageDir)?
            .join("patabima");
        Ok(Self {
            path: dir.join(auth::CREDENTIAL_FILE_NAME),
        })
    }

    /// Create a store at an explicit path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the credential file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> CredentialResult<CredentialFile> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CredentialFile::default()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(CredentialError::PermissionDenied {
                    path: self.path.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, contents: &CredentialFile) -> CredentialResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(contents)?;
        std::fs::write(&self.path, bytes)?;
        self.restrict_permissions()?;
        Ok(())
    }

    #[cfg(unix)]
    fn restrict_permissions(&self) -> CredentialResult<()> {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(auth::CREDENTIAL_FILE_PERMISSIONS);
        std::fs::set_permissions(&self.path, perms)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn restrict_permissions(&self) -> CredentialResult<()> {
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get_access_token(&self) -> CredentialResult<Option<String>> {
        Ok(self.read_file()?.access_token)
    }

    fn get_refresh_token(&self) -> CredentialResult<Option<String>> {
        Ok(self.read_file()?.refresh_token)
    }

    fn get_token_expiry(&self) -> CredentialResult<Option<DateTime<Utc>>> {
        Ok(self.read_file()?.token_expiry)
    }

    fn store_tokens(&self, tokens: &TokenPair) -> CredentialResult<()> {
        let mut contents = self.read_file().unwrap_or_else(|e| {
            warn!("Unreadable credential file, rewriting: {e}");
            CredentialFile::default()
        });
        contents.access_token = Some(tokens.access.clone());
        contents.refresh_token = tokens.refresh.clone();
        contents.token_expiry = tokens.expires_at;
        contents.session_start.get_or_insert_with(Utc::now);
        self.write_file(&contents)?;
        debug!("Stored tokens to {}", self.path.display());
        Ok(())
    }

    fn clear_all(&self) -> CredentialResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory credential store for tests and embedders with their own
/// persistence layer
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing pair
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_access_token(&self) -> CredentialResult<Option<String>> {
        Ok(self
            .tokens
            .read()
            .expect("credential lock poisoned")
            .as_ref()
            .map(|t| t.access.clone()))
    }

    fn get_refresh_token(&self) -> CredentialResult<Option<String>> {
        Ok(self
            .tokens
            .read()
            .expect("credential lock poisoned")
            .as_ref()
            .and_then(|t| t.refresh.clone()))
    }

    fn get_token_expiry(&self) -> CredentialResult<Option<DateTime<Utc>>> {
        Ok(self
            .tokens
            .read()
            .expect("credential lock poisoned")
            .as_ref()
            .and_then(|t| t.expires_at))
    }

    fn store_tokens(&self, tokens: &TokenPair) -> CredentialResult<()> {
        *self.tokens.write().expect("credential lock poisoned") = Some(tokens.clone());
        Ok(())
    }

    fn clear_all(&self) -> CredentialResult<()> {
        *self.tokens.write().expect("credential lock poisoned") = None;
        Ok(())
    }
}
