use serde::{Deserialize, Serialize};
use serde_json::Value;

// -- Anti-forgery --

/// Body of `PATCH /csrf`. The field may be absent on backends that only set
/// the `XSRF-TOKEN` cookie; the gateway falls back to the cookie jar then.
#[derive(Debug, Default, Deserialize)]
pub struct CsrfResponse {
    #[serde(default, rename = "csrfToken")]
    pub csrf_token: Option<String>,
}

// -- Auth --

#[derive(Debug, Serialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}

/// Response of the token-issuing endpoint. Both fields are optional so a
/// rejection body like `{"message": "Invalid credentials"}` and a success
/// body like `{"token": "..."}` parse through the same shape.
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error payload shared by the message endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: Option<String>,
}

// -- Messages --

#[derive(Debug, Serialize)]
pub struct CreateMessageRequest {
    pub text: String,
    #[serde(rename = "conversationId", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// A message record as the backend sends it, before normalization.
///
/// Field names vary across backend revisions, so every lookup tolerates the
/// spellings seen in the wild. Ids and timestamps arrive as strings or
/// numbers depending on the store behind the API, hence `Value`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, alias = "content", alias = "body")]
    pub text: Option<String>,
    #[serde(default, rename = "createdAt", alias = "created_at", alias = "timestamp")]
    pub created_at: Option<Value>,
    #[serde(default, rename = "userId", alias = "user_id", alias = "authorId")]
    pub user_id: Option<Value>,
    #[serde(default, rename = "userName", alias = "username", alias = "author")]
    pub user_name: Option<String>,
    #[serde(default, rename = "mine", alias = "isMine")]
    pub mine: Option<bool>,
}
