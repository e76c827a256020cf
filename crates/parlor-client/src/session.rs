use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::Method;
use serde_json::{Map, Value};
use tracing::{info, warn};

use parlor_types::api::{TokenRequest, TokenResponse};
use parlor_types::models::{Identity, Session};

use crate::error::ClientError;
use crate::gateway::Gateway;
use crate::store::CredentialStore;
use crate::token;

/// Shown when the token claims carry no avatar.
pub const AVATAR_PLACEHOLDER: &str = "https://i.pravatar.cc/200";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
}

/// Orchestrates the login handshake and owns every write to the credential
/// store. State machine: `Anonymous → Authenticating → Authenticated`, back
/// to `Anonymous` on logout or detected invalidation; nothing else.
pub struct SessionManager {
    store: Arc<CredentialStore>,
    gateway: Arc<Gateway>,
    state: Mutex<SessionState>,
    /// Bumped whenever the session is torn down. In-flight operations
    /// snapshot this before suspending and drop their results if it moved.
    generation: AtomicU64,
}

impl SessionManager {
    pub fn new(store: Arc<CredentialStore>, gateway: Arc<Gateway>) -> Self {
        Self {
            store,
            gateway,
            state: Mutex::new(SessionState::Anonymous),
            generation: AtomicU64::new(0),
        }
    }

    /// Pick up a persisted session from a previous page lifetime. A present
    /// token counts as authenticated without a server round-trip; the first
    /// protected call validates it for real.
    pub fn restore(&self) -> Option<Session> {
        let session = self.store.load()?;
        *self.lock_state() = SessionState::Authenticated;
        info!("restored session for {}", session.identity.display_name);
        Some(session)
    }

    /// The full handshake: anti-forgery fetch, credential submission, token
    /// receipt, identity derivation, persistence. Nothing is persisted
    /// unless every step succeeds.
    pub async fn login(&self, username: &str, password: &str) -> Result<Identity, ClientError> {
        {
            let mut state = self.lock_state();
            if *state == SessionState::Authenticating {
                return Err(ClientError::Validation(
                    "a login attempt is already in flight".into(),
                ));
            }
            *state = SessionState::Authenticating;
        }

        let result = self.exchange_credentials(username, password).await;
        match &result {
            Ok(identity) => {
                *self.lock_state() = SessionState::Authenticated;
                info!("logged in as {}", identity.display_name);
            }
            Err(e) => {
                *self.lock_state() = SessionState::Anonymous;
                warn!("login failed: {}", e);
            }
        }
        result
    }

    async fn exchange_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Identity, ClientError> {
        let csrf_token = self.gateway.csrf_token().await?;

        let request = self
            .gateway
            .request(Method::POST, "/auth/token")
            .json(&TokenRequest {
                username: username.to_string(),
                password: password.to_string(),
                csrf_token,
            });
        let response = self.gateway.execute(request).await?;

        let status = response.status();
        // Tolerate empty or non-JSON bodies the way the endpoint's
        // rejections sometimes arrive.
        let body = response.text().await?;
        let parsed: TokenResponse = serde_json::from_str(&body).unwrap_or_default();

        if !status.is_success() {
            return Err(ClientError::auth(
                parsed.message.unwrap_or_else(|| "login failed".to_string()),
            ));
        }

        let Some(jwt) = parsed.token.filter(|t| !t.is_empty()) else {
            return Err(ClientError::MissingToken);
        };

        let claims = token::decode(&jwt);
        let identity = derive_identity(claims.as_ref(), username);
        self.store.save(&Session {
            token: jwt,
            identity: identity.clone(),
        });
        Ok(identity)
    }

    pub fn logout(&self) {
        self.teardown();
        info!("logged out");
    }

    /// The forced-logout path: a protected call came back 401. Clears the
    /// store so the next gateway read sees no token.
    pub fn invalidate(&self) {
        self.teardown();
        warn!("session rejected by the backend, credentials dropped");
    }

    fn teardown(&self) {
        self.store.clear();
        *self.lock_state() = SessionState::Anonymous;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.store.load().map(|session| session.identity)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Identity fallback rules: identifier from the subject claims, display
/// name from the claims or the submitted username, avatar from the claims
/// or the fixed placeholder.
fn derive_identity(claims: Option<&Map<String, Value>>, username: &str) -> Identity {
    let id = claims.and_then(|c| token::string_claim(c, &["userId", "sub", "id"]));
    let display_name = claims
        .and_then(|c| token::string_claim(c, &["username", "name"]))
        .unwrap_or_else(|| username.to_string());
    let avatar_url = claims
        .and_then(|c| token::string_claim(c, &["avatar"]))
        .unwrap_or_else(|| AVATAR_PLACEHOLDER.to_string());
    Identity {
        id,
        display_name,
        avatar_url,
    }
}
