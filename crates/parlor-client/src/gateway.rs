use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use parlor_types::api::CsrfResponse;

use crate::error::ClientError;
use crate::store::CredentialStore;

/// Cookie the backend sets alongside the anti-forgery endpoint. Read
/// directly when the response body omits the token field.
pub const XSRF_COOKIE: &str = "XSRF-TOKEN";

/// All engine traffic goes through here. The gateway attaches the bearer
/// token and keeps the cookie jar that carries the server's anti-forgery
/// cookie; it deliberately knows nothing about session policy. A 401 comes
/// back as an ordinary response for the caller to act on.
pub struct Gateway {
    http: Client,
    cookies: Arc<Jar>,
    base_url: String,
    store: Arc<CredentialStore>,
}

impl Gateway {
    pub fn new(base_url: String, store: Arc<CredentialStore>) -> Result<Self, ClientError> {
        let cookies = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(cookies.clone())
            .build()?;
        Ok(Self {
            http,
            cookies,
            base_url,
            store,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a request against an API path. The token is re-read from the
    /// credential store on every call, never cached, so a session cleared
    /// by another component is honored immediately.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        let builder = self.http.request(method, url);
        match self.store.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send the request. Transport failures become `Network`; any HTTP
    /// status, 401 included, is returned as a normal response so callers
    /// can inspect status and body.
    pub async fn execute(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let response = builder.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("request to {} rejected with 401", response.url());
        }
        Ok(response)
    }

    /// Obtain a fresh anti-forgery token. Fetched per logical operation
    /// group, never persisted; staleness is not assumed safe. Prefers the
    /// token field in the response body, falls back to the `XSRF-TOKEN`
    /// cookie the server may have set instead.
    pub async fn csrf_token(&self) -> Result<String, ClientError> {
        let response = self.execute(self.request(Method::PATCH, "/csrf")).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::auth(format!(
                "could not obtain an anti-forgery token (status {})",
                status.as_u16()
            )));
        }

        let body = response.json::<CsrfResponse>().await.unwrap_or_default();
        if let Some(token) = body.csrf_token.filter(|t| !t.is_empty()) {
            return Ok(token);
        }
        if let Some(token) = self.cookie_value(XSRF_COOKIE) {
            return Ok(token);
        }
        Err(ClientError::auth("anti-forgery token missing from response"))
    }

    /// Read one named cookie from the jar.
    pub fn cookie_value(&self, name: &str) -> Option<String> {
        let url = self.base_url.parse().ok()?;
        let header = self.cookies.cookies(&url)?;
        let raw = header.to_str().ok()?;
        raw.split("; ").find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name && !value.is_empty()).then(|| value.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Gateway {
        Gateway::new(
            "http://127.0.0.1:3000".into(),
            Arc::new(CredentialStore::in_memory()),
        )
        .expect("client builds")
    }

    #[test]
    fn cookie_value_finds_named_cookie() {
        let gw = gateway();
        let url = "http://127.0.0.1:3000".parse().unwrap();
        gw.cookies.add_cookie_str("XSRF-TOKEN=tok-abc", &url);
        gw.cookies.add_cookie_str("other=zzz", &url);

        assert_eq!(gw.cookie_value(XSRF_COOKIE).as_deref(), Some("tok-abc"));
        assert_eq!(gw.cookie_value("missing"), None);
    }

    #[test]
    fn cookie_value_handles_empty_jar() {
        assert_eq!(gateway().cookie_value(XSRF_COOKIE), None);
    }
}
