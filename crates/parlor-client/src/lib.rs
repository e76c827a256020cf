//! Client engine for the Parlor chat service.
//!
//! Owns the session lifecycle (anti-forgery fetch → credential submission →
//! token receipt → identity derivation → persistence) and the local message
//! list, kept consistent with the server through optimistic, reconciled
//! updates. The UI layer on top of this is an external collaborator: it
//! calls the operations here and renders the snapshots.

pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod store;
pub mod sync;
pub mod token;

use std::sync::Arc;

pub use config::ClientConfig;
pub use error::ClientError;
pub use parlor_types::models::{Identity, Message, Session};
pub use session::SessionState;

use gateway::Gateway;
use session::SessionManager;
use store::{CredentialStore, MemoryStore, StorageBackend};
use sync::MessageSynchronizer;

/// The surface handed to the UI layer: session operations, message
/// operations, and read-only snapshots of the list and error state.
pub struct ChatClient {
    session: Arc<SessionManager>,
    sync: MessageSynchronizer,
}

impl ChatClient {
    /// Engine with ephemeral credential storage. Sessions will not survive
    /// a restart; use [`ChatClient::with_store`] with a persistent backend
    /// for that.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_store(config, Box::new(MemoryStore::default()))
    }

    pub fn with_store(
        config: ClientConfig,
        backend: Box<dyn StorageBackend>,
    ) -> Result<Self, ClientError> {
        let store = Arc::new(CredentialStore::new(backend));
        let gateway = Arc::new(Gateway::new(config.base_url, store.clone())?);
        let session = Arc::new(SessionManager::new(store, gateway.clone()));
        let sync = MessageSynchronizer::new(gateway, session.clone(), config.conversation_id);
        Ok(Self { session, sync })
    }

    // -- Session --

    /// Adopt a session persisted by an earlier run, if any.
    pub fn restore(&self) -> Option<Session> {
        self.session.restore()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Identity, ClientError> {
        self.session.login(username, password).await
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    // -- Messages --

    pub async fn fetch_all(&self) -> Result<Vec<Message>, ClientError> {
        self.sync.fetch_all().await
    }

    pub async fn send(&self, text: &str) -> Result<Message, ClientError> {
        self.sync.send(text).await
    }

    pub async fn remove(&self, message: &Message) -> Result<(), ClientError> {
        self.sync.remove(message).await
    }

    /// Owned snapshot of the current, ordered message list.
    pub fn messages(&self) -> Vec<Message> {
        self.sync.messages()
    }

    /// The most recent operation failure, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.sync.last_error()
    }
}
