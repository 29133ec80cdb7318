//! Client for the mixi Graph API
//!
//! OAuth2 authorization-code flow with session-backed credentials, plus
//! an authenticated REST/multipart client that refreshes an expired token
//! once and retries.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;

pub use api::{ApiClient, ApiResponse, Form, FormValue};
pub use auth::{Credentials, MemorySessionStore, SessionStore, TokenManager};
pub use config::{AppConfig, Display, Endpoints, SessionFile};
pub use error::{MixiError, Result};
