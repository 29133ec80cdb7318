//! API client module for the mixi Graph API

pub mod client;
pub mod multipart;
pub mod people;
pub mod voice;

pub use client::{detect_error, ApiClient, ApiFailure, ApiResponse, EXPIRED_TOKEN};
pub use multipart::{Form, FormValue};
