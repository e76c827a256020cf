use crate::error::ClientError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
pub const ENV_BASE_URL: &str = "PARLOR_BASE_URL";
pub const ENV_CONVERSATION_ID: &str = "PARLOR_CONVERSATION_ID";

/// Engine configuration. The backend base URL is injected here rather than
/// hardcoded at call sites; a production build points it at the deployed
/// API, tests point it at a loopback server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Optional conversation scope for message fetch/create calls.
    pub conversation_id: Option<String>,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            conversation_id: None,
        })
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Resolve from the environment, falling back to the local default.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var(ENV_BASE_URL)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let conversation_id = std::env::var(ENV_CONVERSATION_ID)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            base_url: normalize_base_url(&base_url)?,
            conversation_id,
        })
    }
}

/// Trim whitespace and trailing slashes, require an http(s) scheme with a
/// host. Rejecting junk here keeps every later `format!("{base}/...")` from
/// producing a silently broken URL.
pub fn normalize_base_url(raw: &str) -> Result<String, ClientError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientError::Validation("base url must not be empty".into()));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ClientError::Validation(
            "base url must use http:// or https://".into(),
        ));
    }
    let Some((_, remainder)) = trimmed.split_once("://") else {
        return Err(ClientError::Validation("base url must include a host".into()));
    };
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ClientError::Validation("base url must include a host".into()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_drops_trailing_slash() {
        let normalized = normalize_base_url(" https://chat.example.com/ ").expect("valid url");
        assert_eq!(normalized, "https://chat.example.com");
    }

    #[test]
    fn normalize_requires_http_scheme() {
        assert!(normalize_base_url("chat.example.com").is_err());
        assert!(normalize_base_url("ftp://chat.example.com").is_err());
    }

    #[test]
    fn normalize_rejects_empty_host() {
        assert!(normalize_base_url("http://").is_err());
        assert!(normalize_base_url("   ").is_err());
    }

    #[test]
    fn config_carries_conversation_scope() {
        let config = ClientConfig::new("http://127.0.0.1:3000")
            .unwrap()
            .with_conversation("general");
        assert_eq!(config.conversation_id.as_deref(), Some("general"));
    }
}
