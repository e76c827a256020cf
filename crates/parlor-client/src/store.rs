use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use parlor_types::models::Session;

const TOKEN_KEY: &str = "auth_token";
const IDENTITY_KEY: &str = "auth_user";

/// Synchronous string key-value storage, the process-wide analog of an
/// origin-scoped browser store. Reads never fail; a value that cannot be
/// read behaves as absent.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Ephemeral backend for tests and throwaway contexts.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl StorageBackend for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
        }
    }
}

/// File-backed store: one JSON object per file, rewritten on every mutation.
/// The in-memory view is authoritative within the process; a failed write is
/// logged and the process keeps going with its current state.
pub struct FileStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    fn persist(&self, values: &HashMap<String, String>) {
        let json = match serde_json::to_string(values) {
            Ok(json) => json,
            Err(e) => {
                warn!("could not serialize credential storage: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!("could not write {}: {}", self.path.display(), e);
        }
    }
}

impl StorageBackend for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
            self.persist(&values);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
            self.persist(&values);
        }
    }
}

/// Owner of the persisted session. The session manager is the only writer;
/// the gateway re-reads through here on every request so a cleared session
/// is honored immediately.
pub struct CredentialStore {
    backend: Box<dyn StorageBackend>,
}

impl CredentialStore {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::default()))
    }

    pub fn save(&self, session: &Session) {
        self.backend.set(TOKEN_KEY, &session.token);
        match serde_json::to_string(&session.identity) {
            Ok(identity) => self.backend.set(IDENTITY_KEY, &identity),
            Err(e) => warn!("could not serialize identity: {}", e),
        }
    }

    /// The persisted session, or None. A missing token, a missing identity,
    /// or an identity that no longer parses all count as "no session".
    pub fn load(&self) -> Option<Session> {
        let token = self.backend.get(TOKEN_KEY)?;
        let identity = serde_json::from_str(&self.backend.get(IDENTITY_KEY)?).ok()?;
        Some(Session { token, identity })
    }

    pub fn token(&self) -> Option<String> {
        self.backend.get(TOKEN_KEY)
    }

    pub fn clear(&self) {
        self.backend.remove(TOKEN_KEY);
        self.backend.remove(IDENTITY_KEY);
    }
}
