//! Authenticated HTTP client for the mixi Graph API
//!
//! Wraps reqwest::Client with token injection and a single
//! refresh-and-retry when the provider reports `expired_token`.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};

use super::multipart::{new_boundary, Form, FormValue};
use crate::auth::{SessionStore, TokenManager};
use crate::error::{MixiError, Result};
use crate::models::Profile;

/// Error code signalling that the access token has expired.
pub const EXPIRED_TOKEN: &str = "expired_token";

/// Successful API result
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// 2xx with an empty body
    Empty,
    Json(serde_json::Value),
}

impl ApiResponse {
    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            ApiResponse::Empty => None,
            ApiResponse::Json(v) => Some(v),
        }
    }
}

/// Why a response was not successful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFailure {
    Code(String),
    Undefined,
}

impl ApiFailure {
    fn into_error(self, status: StatusCode) -> MixiError {
        match self {
            ApiFailure::Code(code) => MixiError::Api { code },
            ApiFailure::Undefined => MixiError::UndefinedApi {
                status: status.as_u16(),
            },
        }
    }
}

/// Classify a response. `None` means success.
pub fn detect_error(
    status: StatusCode,
    www_authenticate: Option<&str>,
    body: &str,
) -> Option<ApiFailure> {
    if status.is_success() {
        return None;
    }
    let code = www_authenticate
        .and_then(challenge_error)
        .or_else(|| body_error(body));
    Some(match code {
        Some(code) if !code.is_empty() => ApiFailure::Code(code),
        _ => ApiFailure::Undefined,
    })
}

/// `error="..."` (or single-quoted) parameter of a WWW-Authenticate challenge.
fn challenge_error(header: &str) -> Option<String> {
    for (idx, _) in header.match_indices("error=") {
        let rest = &header[idx + "error=".len()..];
        let Some(value) = rest.strip_prefix(is_quote) else {
            continue;
        };
        if let Some(end) = value.find(is_quote) {
            return Some(value[..end].trim().to_string());
        }
    }
    None
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

fn body_error(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("error")?.as_str().map(|s| s.trim().to_string())
}

/// Client for REST and multipart calls against the provider.
pub struct ApiClient<S: SessionStore> {
    http: reqwest::Client,
    tokens: TokenManager<S>,
    pub(crate) user: Option<Profile>,
}

impl<S: SessionStore> ApiClient<S> {
    pub fn new(tokens: TokenManager<S>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            user: None,
        }
    }

    pub fn tokens(&self) -> &TokenManager<S> {
        &self.tokens
    }

    pub fn tokens_mut(&mut self) -> &mut TokenManager<S> {
        &mut self.tokens
    }

    /// Absolute URLs pass through; anything else is joined to the API base.
    pub fn resolve_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http") {
            return endpoint.to_string();
        }
        let base = &self.tokens.config().endpoints.api_base;
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// GET with urlencoded query parameters.
    pub async fn get(&mut self, endpoint: &str, params: Form) -> Result<ApiResponse> {
        self.call(endpoint, Method::GET, params, true, false).await
    }

    /// POST with an urlencoded body.
    pub async fn post(&mut self, endpoint: &str, params: Form) -> Result<ApiResponse> {
        self.call(endpoint, Method::POST, params, true, false).await
    }

    /// Send an authenticated request.
    ///
    /// On `expired_token` with `allow_refresh_retry`, refreshes the token and
    /// retries exactly once; every other failure is returned as is.
    pub async fn call(
        &mut self,
        endpoint: &str,
        method: Method,
        mut params: Form,
        allow_refresh_retry: bool,
        multipart: bool,
    ) -> Result<ApiResponse> {
        let url = self.resolve_url(endpoint);
        params.set("format", FormValue::Text("json".to_string()));

        let mut retry_allowed = allow_refresh_retry;
        loop {
            let token = self
                .tokens
                .access_token()
                .ok_or(MixiError::NotAuthenticated)?;

            let (status, challenge, body) = self
                .send(&url, &method, &params, &token, multipart)
                .await?;

            let failure = match detect_error(status, challenge.as_deref(), &body) {
                None => return parse_body(&body),
                Some(failure) => failure,
            };

            if retry_allowed && failure == ApiFailure::Code(EXPIRED_TOKEN.to_string()) {
                retry_allowed = false;
                if self.tokens.refresh(false).await {
                    tracing::info!("Access token refreshed, retrying {} {}", method, url);
                    continue;
                }
            }

            tracing::debug!("{} {} failed with HTTP {}: {:?}", method, url, status, failure);
            return Err(failure.into_error(status));
        }
    }

    async fn send(
        &self,
        url: &str,
        method: &Method,
        params: &Form,
        token: &str,
        multipart: bool,
    ) -> Result<(StatusCode, Option<String>, String)> {
        let request = if *method == Method::GET {
            let mut query = params.clone();
            query.set("oauth_token", FormValue::Text(token.to_string()));
            let separator = if url.contains('?') { '&' } else { '?' };
            let full = format!("{}{}{}", url, separator, query.urlencoded()?);
            tracing::debug!("mixi GET {}", url);
            self.http.get(full)
        } else {
            tracing::debug!("mixi {} {}", method, url);
            let builder = self
                .http
                .request(method.clone(), url)
                .header(AUTHORIZATION, format!("OAuth {}", token));
            if multipart {
                let boundary = new_boundary();
                builder
                    .header(
                        CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", boundary),
                    )
                    .body(params.encode_multipart(&boundary)?)
            } else {
                builder
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(params.urlencoded()?)
            }
        };

        let resp = request.send().await?;
        let status = resp.status();
        let challenge = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = resp.text().await?;
        Ok((status, challenge, body))
    }
}

fn parse_body(body: &str) -> Result<ApiResponse> {
    if body.trim().is_empty() {
        return Ok(ApiResponse::Empty);
    }
    Ok(ApiResponse::Json(serde_json::from_str(body)?))
}
