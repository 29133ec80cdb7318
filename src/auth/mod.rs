//! Authentication module for the mixi Graph API
//!
//! Implements the OAuth2 authorization-code flow and refresh-token
//! exchange, with credentials kept in an injected session store.

pub mod oauth;
pub mod tokens;

pub use oauth::{MixiTokenResponse, TokenManager, EXPIRY_MARGIN_SECS};
pub use tokens::{Credentials, MemorySessionStore, SessionStore};

/// Prefix of the session key; the client id is appended after an underscore.
pub const SESSION_KEY_PREFIX: &str = "mixi";
