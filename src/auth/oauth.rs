//! OAuth2 authorization-code flow and token refresh against the mixi token endpoint

use std::time::Duration;

use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AccessToken, AuthType, AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret,
    RedirectUrl, RefreshToken, Scope, StandardRevocableToken, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use super::{Credentials, SessionStore, SESSION_KEY_PREFIX};
use crate::config::AppConfig;
use crate::error::{MixiError, Result};

/// Seconds shaved off `expires_in` to absorb clock skew and latency.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Token endpoint response. mixi omits `token_type`, so the standard
/// response type cannot be used.
#[derive(Debug, Serialize, Deserialize)]
pub struct MixiTokenResponse {
    access_token: AccessToken,
    #[serde(default = "default_token_type")]
    token_type: BasicTokenType,
    #[serde(default)]
    refresh_token: Option<RefreshToken>,
    #[serde(default, deserialize_with = "deserialize_expires_in")]
    expires_in: Option<u64>,
    #[serde(
        rename = "scope",
        default,
        deserialize_with = "deserialize_scopes",
        serialize_with = "serialize_scopes"
    )]
    scopes: Option<Vec<Scope>>,
}

fn default_token_type() -> BasicTokenType {
    BasicTokenType::Bearer
}

fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<Scope>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| {
        s.split(' ')
            .filter(|t| !t.is_empty())
            .map(|t| Scope::new(t.to_string()))
            .collect()
    }))
}

/// `expires_in` as a number or a numeric string; anything else counts as absent.
fn deserialize_expires_in<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lifetime {
        Seconds(u64),
        Text(String),
    }

    Ok(match Option::<Lifetime>::deserialize(deserializer)? {
        Some(Lifetime::Seconds(secs)) => Some(secs),
        Some(Lifetime::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

fn serialize_scopes<S>(scopes: &Option<Vec<Scope>>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match scopes {
        Some(list) => serializer.serialize_some(&join_scopes(list)),
        None => serializer.serialize_none(),
    }
}

fn join_scopes(scopes: &[Scope]) -> String {
    scopes
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

impl TokenResponse<BasicTokenType> for MixiTokenResponse {
    fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn token_type(&self) -> &BasicTokenType {
        &self.token_type
    }

    fn expires_in(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }

    fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    fn scopes(&self) -> Option<&Vec<Scope>> {
        self.scopes.as_ref()
    }
}

type MixiOAuthClient = Client<
    BasicErrorResponse,
    MixiTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// Build the OAuth2 client from an AppConfig
fn build_client(config: &AppConfig) -> Result<MixiOAuthClient> {
    let auth_url = AuthUrl::new(config.endpoints.authorize_url.clone())?;
    let token_url = TokenUrl::new(config.endpoints.token_url.clone())?;
    let secret = (!config.client_secret.is_empty())
        .then(|| ClientSecret::new(config.client_secret.clone()));

    let mut client = MixiOAuthClient::new(
        ClientId::new(config.client_id.clone()),
        secret,
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody);

    if !config.redirect_uri.is_empty() {
        client = client.set_redirect_uri(RedirectUrl::new(config.redirect_uri.clone())?);
    }
    Ok(client)
}

/// Owns the credential lifecycle for one configured application.
///
/// Credentials live in the injected session store and are re-read on every
/// use. The only state kept here is the outcome of an exchange performed
/// by this manager, which the next non-forced refresh consumes instead of
/// hitting the token endpoint again.
pub struct TokenManager<S: SessionStore> {
    config: AppConfig,
    store: S,
    client: MixiOAuthClient,
    authorize_url: Url,
    just_obtained: Option<bool>,
}

impl<S: SessionStore> TokenManager<S> {
    pub fn new(config: AppConfig, store: S) -> Result<Self> {
        let client = build_client(&config)?;
        let authorize_url = Url::parse(&config.endpoints.authorize_url)?;
        Ok(Self {
            config,
            store,
            client,
            authorize_url,
            just_obtained: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Key under which this application's credentials are stored
    pub fn session_key(&self) -> String {
        format!("{}_{}", SESSION_KEY_PREFIX, self.config.client_id)
    }

    /// Current credential record; empty when nothing was stored yet.
    pub fn credentials(&self) -> Credentials {
        self.store.get(&self.session_key()).unwrap_or_default()
    }

    /// Stored access token, if any.
    pub fn access_token(&self) -> Option<String> {
        let token = self.credentials().access_token;
        (!token.is_empty()).then_some(token)
    }

    /// Write credentials explicitly. `granted_scope: None` keeps the stored scope.
    pub fn set_credentials(
        &mut self,
        access_token: String,
        refresh_token: String,
        expires_at: i64,
        granted_scope: Option<String>,
    ) -> Result<()> {
        let previous = self.credentials();
        let creds = Credentials {
            access_token,
            refresh_token,
            expires_at,
            granted_scope: granted_scope.unwrap_or(previous.granted_scope),
        };
        let key = self.session_key();
        self.store.set(&key, creds)
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials().is_valid()
    }

    /// Whether the granted scope covers `requested` (or the configured scope).
    pub fn is_approved(&self, requested: Option<&str>) -> bool {
        let creds = self.credentials();
        if !creds.is_valid() {
            return false;
        }
        let scopes = requested
            .filter(|s| !s.is_empty())
            .unwrap_or(self.config.scope.as_str());
        creds.grants(scopes)
    }

    /// Authorization page URL. Caller keys replace defaults in place; new keys are appended.
    pub fn login_url(&self, extra: &[(&str, &str)]) -> String {
        let defaults = [
            ("client_id", self.config.client_id.as_str()),
            ("response_type", "code"),
            ("display", self.config.display.as_str()),
            ("scope", self.config.scope.as_str()),
        ];

        let mut url = self.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in defaults {
                let value = extra
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map_or(value, |(_, v)| *v);
                query.append_pair(key, value);
            }
            for (key, value) in extra {
                if !defaults.iter().any(|(k, _)| k == key) {
                    query.append_pair(key, value);
                }
            }
        }
        url.to_string()
    }

    /// Exchange an authorization code for tokens. Returns whether it succeeded.
    pub async fn exchange_authorization_code(&mut self, code: &str) -> bool {
        self.try_exchange_authorization_code(code).await.is_ok()
    }

    /// Like [`exchange_authorization_code`](Self::exchange_authorization_code), with the failure kept.
    pub async fn try_exchange_authorization_code(&mut self, code: &str) -> Result<()> {
        tracing::info!("Exchanging authorization code for access token...");
        let result = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await;

        let outcome = match result {
            Ok(response) => self.store_token_response(&response),
            Err(e) => {
                tracing::warn!("Authorization code exchange failed: {}", e);
                Err(MixiError::TokenExchangeFailed)
            }
        };
        self.just_obtained = Some(outcome.is_ok());
        outcome
    }

    /// Refresh the access token using the stored refresh token.
    ///
    /// Right after an exchange by this manager the exchange outcome is
    /// returned (once) unless `force` is set.
    pub async fn refresh(&mut self, force: bool) -> bool {
        self.try_refresh(force).await.is_ok()
    }

    pub async fn try_refresh(&mut self, force: bool) -> Result<()> {
        if !force {
            if let Some(ok) = self.just_obtained.take() {
                tracing::debug!("Token just obtained, skipping refresh");
                return if ok {
                    Ok(())
                } else {
                    Err(MixiError::TokenExchangeFailed)
                };
            }
        }

        let refresh_token = self.credentials().refresh_token;
        if refresh_token.is_empty() {
            tracing::debug!("No refresh token on record");
            return Err(MixiError::RefreshUnavailable);
        }

        tracing::info!("Refreshing access token...");
        let result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(oauth2::reqwest::async_http_client)
            .await;

        match result {
            Ok(response) => self.store_token_response(&response),
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                Err(MixiError::TokenExchangeFailed)
            }
        }
    }

    /// Run the exchange when an authorization callback query carries `code`.
    pub async fn handle_callback(&mut self, query: &str) -> Option<bool> {
        let code = url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())?;
        Some(self.exchange_authorization_code(&code).await)
    }

    fn store_token_response(&mut self, response: &MixiTokenResponse) -> Result<()> {
        let access_token = response.access_token().secret().to_string();
        if access_token.is_empty() {
            tracing::warn!("Token response carried an empty access token");
            return Err(MixiError::TokenExchangeFailed);
        }
        let expires_in = response
            .expires_in()
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
        let expires_at = chrono::Utc::now()
            .timestamp()
            .saturating_add(expires_in)
            .saturating_sub(EXPIRY_MARGIN_SECS);
        let refresh_token = response
            .refresh_token()
            .map(|t| t.secret().to_string())
            .unwrap_or_default();
        let granted_scope = response.scopes().map(|s| join_scopes(s));

        if let Err(e) = self.set_credentials(access_token, refresh_token, expires_at, granted_scope) {
            tracing::warn!("Failed to persist credentials: {}", e);
            return Err(e);
        }
        tracing::info!("Access token stored (expires_at {})", expires_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemorySessionStore;
    use crate::config::{Display, Endpoints};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> AppConfig {
        AppConfig::new("cid", "csecret")
            .with_scope("r_profile w_voice")
            .with_redirect_uri("https://example.com/cb")
            .with_endpoints(Endpoints {
                authorize_url: "https://mixi.jp/connect_authorize.pl".into(),
                token_url: format!("{}/2/token", server.uri()),
                api_base: format!("{}/", server.uri()),
            })
    }

    fn token_body(access: &str, refresh: &str) -> serde_json::Value {
        serde_json::json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 900,
            "scope": "r_profile w_voice"
        })
    }

    #[tokio::test]
    async fn test_exchange_stores_credentials_with_margin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("client_id=cid"))
            .and(body_string_contains("client_secret=csecret"))
            .and(body_string_contains(
                "redirect_uri=https%3A%2F%2Fexample.com%2Fcb",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at1", "rt1")))
            .expect(1)
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        let before = chrono::Utc::now().timestamp();
        assert!(manager.exchange_authorization_code("the-code").await);
        let after = chrono::Utc::now().timestamp();

        let creds = manager.credentials();
        assert_eq!(creds.access_token, "at1");
        assert_eq!(creds.refresh_token, "rt1");
        assert_eq!(creds.granted_scope, "r_profile w_voice");
        assert!(creds.expires_at >= before + 900 - 60);
        assert!(creds.expires_at <= after + 900 - 60);
        assert!(manager.is_authenticated());
        assert!(manager.store().exists("mixi_cid"));
    }

    #[tokio::test]
    async fn test_exchange_huge_lifetime_saturates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_in": u64::MAX,
                "scope": "r_profile"
            })))
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        assert!(manager.exchange_authorization_code("c").await);
        assert_eq!(manager.credentials().expires_at, i64::MAX - 60);
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_exchange_without_lifetime_is_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "refresh_token": "rt",
                "scope": "r_profile"
            })))
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        assert!(manager.exchange_authorization_code("c").await);
        let now = chrono::Utc::now().timestamp();
        let creds = manager.credentials();
        assert_eq!(creds.access_token, "at");
        assert!(creds.expires_at <= now - 60);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_exchange_accepts_string_lifetime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "refresh_token": "rt",
                "expires_in": "900",
                "scope": "r_profile"
            })))
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        let before = chrono::Utc::now().timestamp();
        assert!(manager.exchange_authorization_code("c").await);
        assert!(manager.credentials().expires_at >= before + 900 - 60);
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_exchange_failure_leaves_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        assert!(matches!(
            manager.try_exchange_authorization_code("bad").await,
            Err(MixiError::TokenExchangeFailed)
        ));
        // The failed outcome is what an immediate refresh reports
        assert!(!manager.refresh(false).await);
        assert_eq!(manager.credentials(), Credentials::default());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_exchange_without_access_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"refresh_token": "rt", "expires_in": 900})),
            )
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        assert!(!manager.exchange_authorization_code("code").await);
        assert!(manager.access_token().is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at", "rt")))
            .expect(0)
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        assert!(!manager.refresh(false).await);
        assert!(!manager.refresh(true).await);
    }

    #[test]
    fn test_refresh_short_circuits_without_network() {
        // Default endpoints point at production; nothing may be sent there.
        let mut manager =
            TokenManager::new(AppConfig::new("cid", "secret"), MemorySessionStore::new()).unwrap();
        assert!(matches!(
            tokio_test::block_on(manager.try_refresh(true)),
            Err(MixiError::RefreshUnavailable)
        ));
        assert!(!manager.store().exists("mixi_cid"));
    }

    #[tokio::test]
    async fn test_refresh_overwrites_and_keeps_scope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-rt"))
            .and(body_string_contains("client_secret=csecret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-at",
                "refresh_token": "new-rt",
                "expires_in": 900
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        manager
            .set_credentials("old-at".into(), "old-rt".into(), 1, Some("r_profile".into()))
            .unwrap();
        assert!(!manager.is_authenticated());

        assert!(manager.refresh(false).await);
        let creds = manager.credentials();
        assert_eq!(creds.access_token, "new-at");
        assert_eq!(creds.refresh_token, "new-rt");
        assert_eq!(creds.granted_scope, "r_profile");
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_after_exchange_uses_outcome_unless_forced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at1", "rt1")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at2", "rt2")))
            .expect(1)
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        assert!(manager.exchange_authorization_code("code").await);

        // Immediately after the exchange: no request
        assert!(manager.refresh(false).await);
        assert_eq!(manager.credentials().access_token, "at1");

        // Forced: always hits the endpoint
        assert!(manager.refresh(true).await);
        assert_eq!(manager.credentials().access_token, "at2");
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        manager
            .set_credentials("at".into(), "rt".into(), 5, Some("r_profile".into()))
            .unwrap();
        assert!(!manager.refresh(true).await);
        assert_eq!(manager.credentials().access_token, "at");
        assert_eq!(manager.credentials().expires_at, 5);
    }

    #[tokio::test]
    async fn test_handle_callback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("code=xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at", "rt")))
            .expect(1)
            .mount(&server)
            .await;

        let mut manager = TokenManager::new(config_for(&server), MemorySessionStore::new()).unwrap();
        assert_eq!(manager.handle_callback("?state=s1").await, None);
        assert_eq!(manager.handle_callback("state=s1&code=xyz").await, Some(true));
        assert!(manager.is_authenticated());
    }

    #[test]
    fn test_is_approved() {
        let config = AppConfig::new("cid", "secret");
        let mut manager = TokenManager::new(config, MemorySessionStore::new()).unwrap();
        let far = chrono::Utc::now().timestamp() + 3600;

        // Not authenticated
        assert!(!manager.is_approved(Some("r_profile")));

        manager
            .set_credentials("at".into(), "rt".into(), far, Some("r_profile".into()))
            .unwrap();
        assert!(manager.is_approved(None));
        assert!(manager.is_approved(Some("r_profile")));
        assert!(manager.is_approved(Some("")));
        assert!(!manager.is_approved(Some("r_profile r_profile+w_voice")));
        assert!(!manager.is_approved(Some("   ")));

        manager
            .set_credentials(
                "at".into(),
                "rt".into(),
                far,
                Some("r_profile r_profile+w_voice".into()),
            )
            .unwrap();
        assert!(manager.is_approved(Some("r_profile r_profile+w_voice")));

        manager
            .set_credentials("at".into(), "rt".into(), far, Some(String::new()))
            .unwrap();
        assert!(!manager.is_approved(Some("r_profile")));
    }

    #[test]
    fn test_is_authenticated_expiry() {
        let mut manager =
            TokenManager::new(AppConfig::new("cid", "secret"), MemorySessionStore::new()).unwrap();
        let now = chrono::Utc::now().timestamp();

        manager
            .set_credentials("at".into(), "rt".into(), now - 1, Some("r_profile".into()))
            .unwrap();
        assert!(!manager.is_authenticated());

        manager
            .set_credentials("at".into(), String::new(), now + 600, None)
            .unwrap();
        assert!(!manager.is_authenticated());

        manager
            .set_credentials("at".into(), "rt".into(), now + 600, None)
            .unwrap();
        assert!(manager.is_authenticated());
    }

    #[test]
    fn test_login_url() {
        let config = AppConfig::new("X", "secret").with_display(Display::Pc);
        let manager = TokenManager::new(config, MemorySessionStore::new()).unwrap();
        assert_eq!(
            manager.login_url(&[]),
            "https://mixi.jp/connect_authorize.pl?client_id=X&response_type=code&display=pc&scope=r_profile"
        );
    }

    #[test]
    fn test_login_url_overrides() {
        let config = AppConfig::new("X", "secret");
        let manager = TokenManager::new(config, MemorySessionStore::new()).unwrap();
        assert_eq!(
            manager.login_url(&[("state", "abc"), ("scope", "r_profile w_voice")]),
            "https://mixi.jp/connect_authorize.pl?client_id=X&response_type=code&display=touch&scope=r_profile+w_voice&state=abc"
        );
    }

    #[test]
    fn test_session_key() {
        let manager =
            TokenManager::new(AppConfig::new("abc123", ""), MemorySessionStore::new()).unwrap();
        assert_eq!(manager.session_key(), "mixi_abc123");
    }
}
