use thiserror::Error;

/// Everything an engine operation can fail with. Each variant is the
/// machine-distinguishable kind; `Display` is the user-facing message.
///
/// `AuthRejected` is the only variant that forces a logout: the session
/// manager observes it on protected calls and drops the stored session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport could not complete (DNS, refused connection, dropped body).
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    /// The anti-forgery or credential exchange was refused, or a protected
    /// call came back 401. Carries the server's message verbatim when the
    /// body had one.
    #[error("{message}")]
    AuthRejected { message: String },

    /// The token-issuing endpoint answered 2xx but without a token field.
    #[error("login response did not contain a token")]
    MissingToken,

    /// Locally detected bad input. Never reaches the network.
    #[error("{0}")]
    Validation(String),

    /// The targeted message no longer exists server-side.
    #[error("message not found")]
    NotFound,

    /// Any other non-2xx status on a protected call.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl ClientError {
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::AuthRejected {
            message: message.into(),
        }
    }

    /// True for the variants that mean "the session is no longer valid".
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::AuthRejected { .. })
    }
}
