use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display identity derived once from token claims at login time.
/// Immutable for the session's lifetime. `id` is None when the claims omit
/// a subject, in which case ownership attribution falls back to name
/// matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Option<String>,
    pub display_name: String,
    pub avatar_url: String,
}

/// The one active session for this client context: the raw bearer token plus
/// the identity derived from it. Persisted across reloads by the credential
/// store; destroyed on logout or when the backend rejects the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub identity: Identity,
}

/// A message as held in the local list, after normalization.
///
/// `key` is the stable dedup handle: the server id when known, a composite
/// of author/timestamp/text for id-less records, or a locally generated key
/// for optimistic entries awaiting confirmation. `mine` is computed once at
/// normalization time and never recomputed from mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub key: String,
    pub id: Option<String>,
    pub author_id: Option<String>,
    pub author_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub mine: bool,
    pub pending: bool,
}
