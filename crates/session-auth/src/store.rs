//! Token storage
//!
//! A dumb string map for the two token keys, behind a trait so the session
//! can run against a JSON file on disk or an in-process map. Operations are
//! synchronous: writing the access and refresh token back-to-back never
//! crosses an `.await`, so no other task can observe a half-written pair.
//!
//! The file store keeps an in-memory copy for reads and persists every
//! mutation with temp-file + rename, so a crash mid-write leaves the
//! previous file intact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use common::Secret;
use serde::Deserialize;
use tracing::{debug, info};

use crate::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::error::{Error, Result};

/// An access/refresh token pair as issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access: Secret<String>,
    pub refresh: Secret<String>,
}

/// Wire shape of `{ "access": ..., "refresh": ... }` bodies.
#[derive(Deserialize)]
struct PairBody {
    access: String,
    refresh: String,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Secret::new(access.into()),
            refresh: Secret::new(refresh.into()),
        }
    }

    /// Parse a login, register or refresh success body.
    pub fn from_response(data: &serde_json::Value) -> Result<Self> {
        let body = PairBody::deserialize(data)
            .map_err(|e| Error::TransientNetwork(format!("unexpected token response: {e}")))?;
        Ok(Self::new(body.access, body.refresh))
    }
}

/// Key-value persistence for the session tokens.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Idempotent: removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Write both tokens of a pair with no suspension point in between.
    fn set_pair(&self, pair: &CredentialPair) -> Result<()> {
        self.set(ACCESS_TOKEN_KEY, pair.access.expose())?;
        self.set(REFRESH_TOKEN_KEY, pair.refresh.expose())
    }

    /// Remove both tokens. Idempotent.
    fn clear(&self) -> Result<()> {
        self.remove(ACCESS_TOKEN_KEY)?;
        self.remove(REFRESH_TOKEN_KEY)
    }

    fn access_token(&self) -> Result<Option<String>> {
        self.get(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        self.get(REFRESH_TOKEN_KEY)
    }
}

fn lock(state: &Mutex<HashMap<String, String>>) -> Result<MutexGuard<'_, HashMap<String, String>>> {
    state
        .lock()
        .map_err(|_| Error::Storage("token store lock poisoned".into()))
}

/// In-process token store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    state: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a pair, as if a login had just happened.
    pub fn with_pair(access: &str, refresh: &str) -> Self {
        let mut map = HashMap::new();
        map.insert(ACCESS_TOKEN_KEY.to_string(), access.to_string());
        map.insert(REFRESH_TOKEN_KEY.to_string(), refresh.to_string());
        Self {
            state: Mutex::new(map),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.state)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.state)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.state)?.remove(key);
        Ok(())
    }

    fn set_pair(&self, pair: &CredentialPair) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.insert(ACCESS_TOKEN_KEY.to_string(), pair.access.expose().clone());
        state.insert(REFRESH_TOKEN_KEY.to_string(), pair.refresh.expose().clone());
        Ok(())
    }
}

/// JSON-file token store, surviving process restarts.
///
/// The file is a flat object of key to token string. It is created as `{}`
/// on first load and always written with 0600 permissions on unix.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileTokenStore {
    /// Load the store at `path`, creating an empty file if none exists.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Storage(format!("reading token file: {e}")))?;
            let tokens: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing token file: {e}")))?;
            info!(path = %path.display(), keys = tokens.len(), "loaded token store");
            tokens
        } else {
            info!(path = %path.display(), "token file not found, starting with empty store");
            let tokens = HashMap::new();
            write_atomic(&path, &tokens)?;
            tokens
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.state)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.insert(key.to_string(), value.to_string());
        debug!(key, "stored token");
        write_atomic(&self.path, &state)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut state = lock(&self.state)?;
        if state.remove(key).is_some() {
            debug!(key, "removed token");
            write_atomic(&self.path, &state)?;
        }
        Ok(())
    }

    fn set_pair(&self, pair: &CredentialPair) -> Result<()> {
        let mut state = lock(&self.state)?;
        state.insert(ACCESS_TOKEN_KEY.to_string(), pair.access.expose().clone());
        state.insert(REFRESH_TOKEN_KEY.to_string(), pair.refresh.expose().clone());
        debug!("stored credential pair");
        write_atomic(&self.path, &state)
    }

    fn clear(&self) -> Result<()> {
        let mut state = lock(&self.state)?;
        let had_access = state.remove(ACCESS_TOKEN_KEY).is_some();
        let had_refresh = state.remove(REFRESH_TOKEN_KEY).is_some();
        if had_access || had_refresh {
            debug!("cleared credential pair");
            write_atomic(&self.path, &state)?;
        }
        Ok(())
    }
}

/// Write the token map atomically via a sibling temp file and rename.
fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("serializing tokens: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp_path = dir.join(format!(".tokens.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Storage(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Storage(format!("setting token file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Storage(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted tokens");
    Ok(())
}
