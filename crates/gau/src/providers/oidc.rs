//! Generic OIDC provider built from explicit endpoint URLs.
//!
//! Works against any authorization server exposing the standard three
//! endpoints. Named providers with quirks belong in their own modules; this
//! one sticks to standard OIDC behavior only.

use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

use gau_core::{
    AuthorizationOptions, CallbackOutcome, OAuthProvider, ProviderError, ProviderProfile, TokenSet,
};

/// Endpoint and credential configuration for [`OidcProvider`].
#[derive(Clone, Debug)]
pub struct OidcConfig {
    /// Key the provider registers under, used in routes and account rows.
    pub id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    /// Scopes requested when the sign-in call does not override them.
    pub default_scopes: Vec<String>,
}

impl OidcConfig {
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            userinfo_endpoint: String::new(),
            default_scopes: vec!["openid".into(), "profile".into(), "email".into()],
        }
    }
}

pub struct OidcProvider {
    config: OidcConfig,
    http: reqwest::Client,
}

impl OidcProvider {
    pub fn new(config: OidcConfig) -> Result<Self, ProviderError> {
        if config.client_id.is_empty() || config.client_secret.is_empty() {
            return Err(ProviderError::configuration(
                "missing OIDC client credentials",
            ));
        }
        if config.authorization_endpoint.is_empty()
            || config.token_endpoint.is_empty()
            || config.userinfo_endpoint.is_empty()
        {
            return Err(ProviderError::configuration(
                "missing OIDC endpoint configuration",
            ));
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    async fn execute_token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenSet, ProviderError> {
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|err| ProviderError::transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::authorization(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let payload: TokenEndpointResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::invalid_response(err.to_string()))?;
        Ok(payload.into_token_set())
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .http
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| ProviderError::transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::invalid_response(format!(
                "userinfo endpoint returned {status}"
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ProviderError::invalid_response(err.to_string()))?;
        let claims: UserinfoClaims = serde_json::from_value(raw.clone())
            .map_err(|err| ProviderError::invalid_response(err.to_string()))?;

        Ok(ProviderProfile {
            id: claims.sub,
            name: claims.name,
            email: claims.email,
            email_verified: claims.email_verified,
            avatar: claims.picture,
            raw,
        })
    }
}

#[async_trait]
impl OAuthProvider for OidcProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn requires_redirect_uri(&self) -> bool {
        true
    }

    async fn authorization_url(
        &self,
        state: &str,
        code_verifier: &str,
        options: &AuthorizationOptions,
    ) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.config.authorization_endpoint).map_err(|err| {
            ProviderError::configuration(format!("invalid authorization endpoint: {err}"))
        })?;

        let scopes = match &options.scopes {
            Some(scopes) if !scopes.is_empty() => scopes.join(" "),
            _ => self.config.default_scopes.join(" "),
        };
        let challenge = gau_core::pkce::PkcePair::challenge_for(code_verifier);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("response_type", "code");
            query.append_pair("scope", &scopes);
            query.append_pair("state", state);
            query.append_pair("code_challenge", &challenge);
            query.append_pair("code_challenge_method", "S256");
            if let Some(redirect_uri) = &options.redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
        }

        Ok(url)
    }

    async fn validate_callback(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: Option<&str>,
    ) -> Result<CallbackOutcome, ProviderError> {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
        ];
        if let Some(redirect_uri) = redirect_uri {
            params.push(("redirect_uri", redirect_uri));
        }

        let tokens = self.execute_token_request(&params).await?;
        let profile = self.fetch_profile(&tokens.access_token).await?;
        Ok(CallbackOutcome { tokens, profile })
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.execute_token_request(&params).await
    }
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenEndpointResponse {
    fn into_token_set(self) -> TokenSet {
        let expires_at = self
            .expires_in
            .map(|secs| OffsetDateTime::now_utc().unix_timestamp() + secs);
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            expires_at,
            scope: self.scope,
            token_type: self.token_type,
        }
    }
}

#[derive(Deserialize)]
struct UserinfoClaims {
    sub: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    picture: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    fn sample_config(base: &str) -> OidcConfig {
        OidcConfig {
            id: "idp".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            authorization_endpoint: format!("{base}/oauth2/authorize"),
            token_endpoint: format!("{base}/oauth2/token"),
            userinfo_endpoint: format!("{base}/oauth2/userinfo"),
            default_scopes: vec!["openid".into(), "email".into()],
        }
    }

    struct StubServer {
        base_url: String,
        token_bodies: Arc<Mutex<Vec<String>>>,
        shutdown: Option<oneshot::Sender<()>>,
    }

    #[derive(Clone)]
    struct StubState {
        token_bodies: Arc<Mutex<Vec<String>>>,
        token_response: Arc<serde_json::Value>,
        userinfo_response: Arc<serde_json::Value>,
    }

    async fn token_handler(State(state): State<StubState>, body: String) -> impl IntoResponse {
        state.token_bodies.lock().expect("bodies lock").push(body);
        (StatusCode::OK, Json((*state.token_response).clone()))
    }

    async fn userinfo_handler(State(state): State<StubState>) -> impl IntoResponse {
        (StatusCode::OK, Json((*state.userinfo_response).clone()))
    }

    impl StubServer {
        async fn start(
            token_response: serde_json::Value,
            userinfo_response: serde_json::Value,
        ) -> Self {
            let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
                .await
                .expect("bind stub listener");
            let addr = listener.local_addr().expect("listener addr");
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let token_bodies = Arc::new(Mutex::new(Vec::new()));
            let state = StubState {
                token_bodies: Arc::clone(&token_bodies),
                token_response: Arc::new(token_response),
                userinfo_response: Arc::new(userinfo_response),
            };

            let app = Router::new()
                .route("/oauth2/token", post(token_handler))
                .route("/oauth2/userinfo", get(userinfo_handler))
                .with_state(state);

            let server = axum::serve(listener, app.into_make_service());
            tokio::spawn(async move {
                let _ = server
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
            });

            Self {
                base_url: format!("http://{addr}"),
                token_bodies,
                shutdown: Some(shutdown_tx),
            }
        }

        fn take_token_bodies(&self) -> Vec<String> {
            self.token_bodies.lock().expect("bodies lock").clone()
        }
    }

    impl Drop for StubServer {
        fn drop(&mut self) {
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn authorization_url_carries_expected_parameters() {
        let provider = OidcProvider::new(sample_config("https://idp.example.com")).expect("provider");
        let url = provider
            .authorization_url(
                "state123",
                "verifier123",
                &AuthorizationOptions {
                    scopes: None,
                    redirect_uri: Some("https://app.example.com/api/auth/idp/callback".into()),
                },
            )
            .await
            .expect("url");

        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params.get("client_id"), Some(&"client".to_string()));
        assert_eq!(params.get("response_type"), Some(&"code".to_string()));
        assert_eq!(params.get("scope"), Some(&"openid email".to_string()));
        assert_eq!(params.get("state"), Some(&"state123".to_string()));
        assert_eq!(
            params.get("code_challenge"),
            Some(&gau_core::pkce::PkcePair::challenge_for("verifier123"))
        );
        assert_eq!(params.get("code_challenge_method"), Some(&"S256".to_string()));
        assert_eq!(
            params.get("redirect_uri"),
            Some(&"https://app.example.com/api/auth/idp/callback".to_string())
        );
    }

    #[tokio::test]
    async fn scope_override_replaces_defaults() {
        let provider = OidcProvider::new(sample_config("https://idp.example.com")).expect("provider");
        let url = provider
            .authorization_url(
                "s",
                "v",
                &AuthorizationOptions {
                    scopes: Some(vec!["openid".into(), "offline_access".into()]),
                    redirect_uri: None,
                },
            )
            .await
            .expect("url");
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(
            params.get("scope"),
            Some(&"openid offline_access".to_string())
        );
    }

    #[test]
    fn missing_credentials_refused() {
        let mut config = sample_config("https://idp.example.com");
        config.client_secret = String::new();
        assert!(OidcProvider::new(config).is_err());
    }

    #[tokio::test]
    async fn callback_exchanges_code_and_fetches_profile() {
        let server = StubServer::start(
            json!({
                "access_token": "at-1",
                "expires_in": 3600,
                "refresh_token": "rt-1",
                "id_token": "idt-1",
                "scope": "openid email",
                "token_type": "Bearer"
            }),
            json!({
                "sub": "user-42",
                "name": "Ada Lovelace",
                "email": "ada@example.com",
                "email_verified": true,
                "picture": "https://idp.example.com/ada.png"
            }),
        )
        .await;

        let provider = OidcProvider::new(sample_config(&server.base_url)).expect("provider");
        let outcome = provider
            .validate_callback(
                "authcode",
                "verifier123",
                Some("https://app.example.com/api/auth/idp/callback"),
            )
            .await
            .expect("callback");

        assert_eq!(outcome.tokens.access_token, "at-1");
        assert_eq!(outcome.tokens.refresh_token.as_deref(), Some("rt-1"));
        assert!(outcome.tokens.expires_at.is_some());
        assert_eq!(outcome.profile.id, "user-42");
        assert_eq!(outcome.profile.email.as_deref(), Some("ada@example.com"));
        assert_eq!(outcome.profile.email_verified, Some(true));

        let bodies = server.take_token_bodies();
        assert!(
            bodies
                .iter()
                .any(|body| body.contains("grant_type=authorization_code")
                    && body.contains("code_verifier=verifier123")),
            "expected PKCE code exchange request"
        );
    }

    #[tokio::test]
    async fn refresh_hits_token_endpoint() {
        let server = StubServer::start(
            json!({
                "access_token": "at-2",
                "expires_in": 900,
                "token_type": "Bearer"
            }),
            json!({ "sub": "unused" }),
        )
        .await;

        let provider = OidcProvider::new(sample_config(&server.base_url)).expect("provider");
        let tokens = provider.refresh_access_token("rt-1").await.expect("tokens");
        assert_eq!(tokens.access_token, "at-2");

        let bodies = server.take_token_bodies();
        assert!(
            bodies
                .iter()
                .any(|body| body.contains("grant_type=refresh_token")),
            "expected refresh_token grant request"
        );
    }
}
