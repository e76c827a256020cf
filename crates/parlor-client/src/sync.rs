use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use parlor_types::api::{ApiError, CreateMessageRequest, RawMessage};
use parlor_types::models::{Identity, Message};

use crate::error::ClientError;
use crate::gateway::Gateway;
use crate::session::SessionManager;

/// Header the backend expects the anti-forgery value echoed in.
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Owns the authoritative local view of the message list: fetch, optimistic
/// append, reconciliation against server responses, deletion. Every failure
/// is rolled back before it is surfaced, so the list is never left half
/// mutated.
pub struct MessageSynchronizer {
    gateway: Arc<Gateway>,
    session: Arc<SessionManager>,
    conversation_id: Option<String>,
    messages: Mutex<Vec<Message>>,
    last_error: Mutex<Option<String>>,
}

impl MessageSynchronizer {
    pub fn new(
        gateway: Arc<Gateway>,
        session: Arc<SessionManager>,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            gateway,
            session,
            conversation_id,
            messages: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
        }
    }

    /// Owned snapshot of the current list, ordered for display.
    pub fn messages(&self) -> Vec<Message> {
        self.lock_messages().clone()
    }

    /// The most recent operation failure, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Canonical refresh path. Fetches the full collection, normalizes it,
    /// and merges it into the current list by key; idempotent for an
    /// unchanged server state. If the session was torn down while the
    /// request was in flight the result is discarded, not applied.
    pub async fn fetch_all(&self) -> Result<Vec<Message>, ClientError> {
        let generation = self.session.generation();

        match self.fetch_batch().await {
            Ok(batch) => {
                if self.session.generation() != generation {
                    debug!("fetch superseded, result discarded");
                    return Ok(self.messages());
                }
                let merged = {
                    let mut list = self.lock_messages();
                    *list = merge(&list, batch);
                    list.clone()
                };
                self.set_error(None);
                Ok(merged)
            }
            Err(e) => {
                self.set_error(Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn fetch_batch(&self) -> Result<Vec<Message>, ClientError> {
        let csrf_token = self.gateway.csrf_token().await?;

        let mut request = self
            .gateway
            .request(Method::GET, "/messages")
            .header(CSRF_HEADER, &csrf_token);
        if let Some(conversation_id) = &self.conversation_id {
            request = request.query(&[("conversationId", conversation_id)]);
        }

        let response = self.gateway.execute(request).await?;
        let response = self.guard_protected(response).await?;

        let status = response.status();
        let body = response.text().await?;
        let raw: Vec<RawMessage> = serde_json::from_str(&body).map_err(|_| {
            ClientError::Server {
                status: status.as_u16(),
                message: "malformed message collection".into(),
            }
        })?;

        let identity = self.session.identity();
        let now = Utc::now();
        let batch = raw
            .iter()
            .enumerate()
            .filter_map(|(index, record)| normalize(record, identity.as_ref(), now, index))
            .collect();
        Ok(batch)
    }

    /// Optimistic send: the pending entry is visible immediately and either
    /// replaced in place by the server-confirmed record or rolled back.
    pub async fn send(&self, text: &str) -> Result<Message, ClientError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            let e = ClientError::Validation("message text must not be empty".into());
            self.set_error(Some(e.to_string()));
            return Err(e);
        }

        // Defense in depth; the server remains the authority on sanitizing.
        let safe_text = escape_html(trimmed);

        let generation = self.session.generation();
        let identity = self.session.identity();
        let key = format!("local:{}", Uuid::new_v4());
        let pending = Message {
            key: key.clone(),
            id: None,
            author_id: identity.as_ref().and_then(|i| i.id.clone()),
            author_name: identity
                .as_ref()
                .map(|i| i.display_name.clone())
                .unwrap_or_default(),
            text: safe_text.clone(),
            created_at: Utc::now(),
            mine: true,
            pending: true,
        };
        self.lock_messages().push(pending.clone());

        match self.submit(&safe_text).await {
            Ok(raw) => {
                let mut confirmed = match normalize(&raw, identity.as_ref(), Utc::now(), 0) {
                    Some(message) => message,
                    None => {
                        // Backend answered 2xx with an unusable record; the
                        // local copy stands in for it.
                        let mut message = pending.clone();
                        message.id = raw.id.as_ref().and_then(value_to_string);
                        if let Some(id) = &message.id {
                            message.key = format!("id:{id}");
                        }
                        message
                    }
                };
                confirmed.mine = true;
                confirmed.pending = false;

                let mut list = self.lock_messages();
                if self.session.generation() != generation {
                    debug!("send superseded, confirmation discarded");
                    list.retain(|m| m.key != key);
                } else if let Some(slot) = list.iter_mut().find(|m| m.key == key) {
                    *slot = confirmed.clone();
                } else if !list.iter().any(|m| m.key == confirmed.key) {
                    // A concurrent refetch already reconciled the pending
                    // entry away; insert the confirmation in order.
                    list.push(confirmed.clone());
                    list.sort_by_key(|m| m.created_at);
                }
                drop(list);
                self.set_error(None);
                Ok(confirmed)
            }
            Err(e) => {
                self.lock_messages().retain(|m| m.key != key);
                self.set_error(Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn submit(&self, text: &str) -> Result<RawMessage, ClientError> {
        let csrf_token = self.gateway.csrf_token().await?;

        let request = self
            .gateway
            .request(Method::POST, "/messages")
            .header(CSRF_HEADER, &csrf_token)
            .json(&CreateMessageRequest {
                text: text.to_string(),
                conversation_id: self.conversation_id.clone(),
            });

        let response = self.gateway.execute(request).await?;
        let response = self.guard_protected(response).await?;

        let body = response.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }

    /// Delete by server identifier. The local entry goes away only after
    /// the server confirms; ownership is not enforced here, the server
    /// rejects deletes of other people's messages.
    pub async fn remove(&self, message: &Message) -> Result<(), ClientError> {
        let Some(id) = message.id.as_deref().filter(|id| !id.is_empty()) else {
            let e = ClientError::Validation("message has no server identifier".into());
            self.set_error(Some(e.to_string()));
            return Err(e);
        };

        match self.delete_by_id(id).await {
            Ok(()) => {
                self.lock_messages().retain(|m| m.id.as_deref() != Some(id));
                self.set_error(None);
                Ok(())
            }
            Err(e) => {
                self.set_error(Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), ClientError> {
        let csrf_token = self.gateway.csrf_token().await?;

        let request = self
            .gateway
            .request(Method::DELETE, &format!("/messages/{id}"))
            .header(CSRF_HEADER, &csrf_token);
        let response = self.gateway.execute(request).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }
        self.guard_protected(response).await.map(|_| ())
    }

    /// 401 on a protected call is the one condition that forces logout;
    /// other non-2xx statuses surface the server's message.
    async fn guard_protected(&self, response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.session.invalidate();
            return Err(ClientError::auth("session expired, log in again"));
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .ok()
            .and_then(|e| e.message)
            .filter(|m| !m.is_empty())
            .unwrap_or(body);
        Err(ClientError::Server {
            status: status.as_u16(),
            message,
        })
    }

    fn lock_messages(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_error(&self, error: Option<String>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }
}

/// Make text safe to embed in HTML before it leaves the client.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// One tolerant normalization step for every backend shape.
///
/// Records with no usable text are dropped (never rendered as empty
/// bubbles) without failing the whole batch. A missing timestamp is
/// stamped with `now` rather than treated as invalid. `mine` precedence:
/// explicit flag, id match, display-name match.
pub(crate) fn normalize(
    raw: &RawMessage,
    identity: Option<&Identity>,
    now: DateTime<Utc>,
    index: usize,
) -> Option<Message> {
    let text = raw.text.as_deref().map(str::trim).filter(|t| !t.is_empty())?;

    let id = raw.id.as_ref().and_then(value_to_string);
    let author_id = raw.user_id.as_ref().and_then(value_to_string);
    let author_name = raw.user_name.clone().unwrap_or_default();
    let created_at = raw
        .created_at
        .as_ref()
        .and_then(parse_timestamp)
        .unwrap_or(now);

    let mine = match raw.mine {
        Some(flag) => flag,
        None => match (identity.and_then(|i| i.id.as_deref()), author_id.as_deref()) {
            (Some(own_id), Some(author_id)) => own_id == author_id,
            _ => identity
                .map(|i| !i.display_name.is_empty() && i.display_name == author_name)
                .unwrap_or(false),
        },
    };

    let key = match &id {
        Some(id) => format!("id:{id}"),
        None if author_name.is_empty() && raw.created_at.is_none() => format!("p:{index}"),
        None => {
            let prefix: String = text.chars().take(16).collect();
            format!("c:{}|{}|{}", author_name, created_at.timestamp_millis(), prefix)
        }
    };

    Some(Message {
        key,
        id,
        author_id,
        author_name,
        text: text.to_string(),
        created_at,
        mine,
        pending: false,
    })
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Timestamps arrive as RFC 3339 strings, naive SQLite-style strings, or
/// epoch numbers (seconds or milliseconds).
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| ndt.and_utc())
                    .ok()
            }),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw.abs() >= 1_000_000_000_000 {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}

/// Merge a normalized batch into the current list. First-seen wins on key
/// collisions; local pending entries the batch does not cover survive the
/// merge; ordering is ascending `created_at` with ties kept in insertion
/// order (the sort is stable).
pub(crate) fn merge(current: &[Message], batch: Vec<Message>) -> Vec<Message> {
    let mut seen: HashSet<String> = HashSet::with_capacity(batch.len());
    let mut next: Vec<Message> = Vec::with_capacity(batch.len());

    for message in batch {
        if seen.insert(message.key.clone()) {
            next.push(message);
        }
    }
    for message in current {
        if message.pending && !seen.contains(&message.key) {
            seen.insert(message.key.clone());
            next.push(message.clone());
        }
    }

    next.sort_by_key(|m| m.created_at);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> Identity {
        Identity {
            id: Some("u1".into()),
            display_name: "Alice".into(),
            avatar_url: "https://i.pravatar.cc/200".into(),
        }
    }

    fn raw(value: Value) -> RawMessage {
        serde_json::from_value(value).expect("raw message parses")
    }

    #[test]
    fn ownership_by_id_match() {
        let message = normalize(
            &raw(json!({"userId": "u1", "text": "hi"})),
            Some(&identity()),
            Utc::now(),
            0,
        )
        .expect("normalized");
        assert!(message.mine);
    }

    #[test]
    fn ownership_false_for_other_author() {
        let message = normalize(
            &raw(json!({"username": "Bob", "text": "hi"})),
            Some(&identity()),
            Utc::now(),
            0,
        )
        .expect("normalized");
        assert!(!message.mine);
    }

    #[test]
    fn ownership_explicit_flag_wins_over_id() {
        let message = normalize(
            &raw(json!({"mine": false, "userId": "u1", "text": "hi"})),
            Some(&identity()),
            Utc::now(),
            0,
        )
        .expect("normalized");
        assert!(!message.mine);
    }

    #[test]
    fn ownership_name_match_when_ids_absent() {
        let message = normalize(
            &raw(json!({"username": "Alice", "text": "hi"})),
            Some(&identity()),
            Utc::now(),
            0,
        )
        .expect("normalized");
        assert!(message.mine);
    }

    #[test]
    fn empty_text_is_filtered() {
        assert!(normalize(&raw(json!({"id": 1})), None, Utc::now(), 0).is_none());
        assert!(normalize(&raw(json!({"text": "   "})), None, Utc::now(), 0).is_none());
    }

    #[test]
    fn missing_timestamp_is_stamped_with_now() {
        let now = Utc::now();
        let message = normalize(&raw(json!({"id": "m1", "text": "hi"})), None, now, 0).unwrap();
        assert_eq!(message.created_at, now);
    }

    #[test]
    fn alternate_field_spellings_are_accepted() {
        let message = normalize(
            &raw(json!({
                "id": 9,
                "content": "hello",
                "created_at": "2024-05-01 10:30:00",
                "user_id": 7,
                "author": "Eve"
            })),
            None,
            Utc::now(),
            0,
        )
        .expect("normalized");
        assert_eq!(message.text, "hello");
        assert_eq!(message.id.as_deref(), Some("9"));
        assert_eq!(message.author_id.as_deref(), Some("7"));
        assert_eq!(message.author_name, "Eve");
        assert_eq!(message.created_at.to_rfc3339(), "2024-05-01T10:30:00+00:00");
    }

    #[test]
    fn epoch_timestamps_parse_in_seconds_and_millis() {
        let seconds = parse_timestamp(&json!(1_700_000_000)).unwrap();
        let millis = parse_timestamp(&json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(seconds, millis);
    }

    #[test]
    fn key_prefers_server_id() {
        let message = normalize(&raw(json!({"id": "m1", "text": "hi"})), None, Utc::now(), 3).unwrap();
        assert_eq!(message.key, "id:m1");
    }

    #[test]
    fn key_falls_back_to_composite_then_position() {
        let composite = normalize(
            &raw(json!({"username": "Bob", "createdAt": "2024-05-01T10:30:00Z", "text": "hello there"})),
            None,
            Utc::now(),
            0,
        )
        .unwrap();
        assert!(composite.key.starts_with("c:Bob|"));

        let positional = normalize(&raw(json!({"text": "hi"})), None, Utc::now(), 4).unwrap();
        assert_eq!(positional.key, "p:4");
    }

    fn message(key: &str, at: i64, pending: bool) -> Message {
        Message {
            key: key.into(),
            id: None,
            author_id: None,
            author_name: "x".into(),
            text: "t".into(),
            created_at: DateTime::from_timestamp(at, 0).unwrap(),
            mine: false,
            pending,
        }
    }

    #[test]
    fn merge_deduplicates_first_seen_wins() {
        let mut first = message("id:1", 10, false);
        first.text = "original".into();
        let mut dup = message("id:1", 10, false);
        dup.text = "impostor".into();

        let merged = merge(&[], vec![first, dup, message("id:2", 20, false)]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "original");
    }

    #[test]
    fn merge_keeps_unconfirmed_pending_entries() {
        let current = vec![message("local:a", 30, true), message("id:1", 10, false)];
        let merged = merge(&current, vec![message("id:1", 10, false), message("id:2", 20, false)]);

        let keys: Vec<&str> = merged.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["id:1", "id:2", "local:a"]);
    }

    #[test]
    fn merge_drops_confirmed_entries_the_server_no_longer_has() {
        let current = vec![message("id:1", 10, false), message("id:2", 20, false)];
        let merged = merge(&current, vec![message("id:2", 20, false)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].key, "id:2");
    }

    #[test]
    fn merge_orders_by_timestamp_with_stable_ties() {
        let merged = merge(
            &[],
            vec![
                message("id:b", 10, false),
                message("id:a", 5, false),
                message("id:c", 10, false),
            ],
        );
        let keys: Vec<&str> = merged.iter().map(|m| m.key.as_str()).collect();
        // The two timestamp ties keep their arrival order.
        assert_eq!(keys, vec!["id:a", "id:b", "id:c"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let batch = vec![message("id:1", 10, false), message("id:2", 20, false)];
        let once = merge(&[], batch.clone());
        let twice = merge(&once, batch);
        assert_eq!(once, twice);
    }

    #[test]
    fn escape_html_covers_significant_characters() {
        assert_eq!(
            escape_html(r#"<b>&"tag"</b> 'x'"#),
            "&lt;b&gt;&amp;&quot;tag&quot;&lt;/b&gt; &#039;x&#039;"
        );
        assert_eq!(escape_html("plain text"), "plain text");
    }
}
