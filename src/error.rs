//! Error type shared by the token manager and the API client

use thiserror::Error;

/// Error code used when a failed response carries no recognizable error.
pub const UNDEFINED_ERROR: &str = "undefined error";

#[derive(Debug, Error)]
pub enum MixiError {
    /// Token endpoint answered without an access token
    #[error("token exchange failed")]
    TokenExchangeFailed,

    /// No access token on record for an authenticated call
    #[error("not authenticated; obtain a token first")]
    NotAuthenticated,

    /// Refresh requested but no refresh token is stored
    #[error("no refresh token on record")]
    RefreshUnavailable,

    /// Non-2xx API response with a provider error code
    #[error("api access error: {code}")]
    Api { code: String },

    /// Non-2xx API response without a parseable error code
    #[error("api access error: {UNDEFINED_ERROR} (HTTP {status})")]
    UndefinedApi { status: u16 },

    #[error("attachment field '{0}' can only be sent as multipart")]
    AttachmentNotAllowed(String),

    #[error("'{0}' cannot be written into a multipart part header")]
    InvalidPartHeader(String),

    #[error("session store error: {0}")]
    Session(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl MixiError {
    /// Provider error code carried by an API failure, if any.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            MixiError::Api { code } => Some(code),
            MixiError::UndefinedApi { .. } => Some(UNDEFINED_ERROR),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MixiError>;
