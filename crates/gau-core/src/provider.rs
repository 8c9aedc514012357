//! The capability contract every OAuth integration implements.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

/// OAuth token material returned by a provider exchange or refresh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Access token expiry as unix epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Normalized profile a provider reports for the authenticated subject.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    /// Provider-scoped stable account id.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub avatar: Option<String>,
    /// Raw provider payload for host-side inspection.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Result of a successful code exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct CallbackOutcome {
    pub tokens: TokenSet,
    pub profile: ProviderProfile,
}

#[derive(Clone, Debug, Default)]
pub struct AuthorizationOptions {
    pub scopes: Option<Vec<String>>,
    pub redirect_uri: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Configuration,
    Transport,
    Authorization,
    InvalidResponse,
    Unsupported,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderErrorKind::Configuration => "configuration",
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Authorization => "authorization",
            ProviderErrorKind::InvalidResponse => "invalid-response",
            ProviderErrorKind::Unsupported => "unsupported",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("provider {kind} error: {message}")]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Configuration, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transport, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Authorization, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidResponse, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unsupported, message)
    }

    pub fn kind(&self) -> ProviderErrorKind {
        self.kind
    }
}

/// Uniform interface the exchange orchestrator drives. Implementations are
/// looked up by id and never branched on beyond that.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Stable string key used in routes and account rows.
    fn id(&self) -> &str;

    /// Whether the provider needs an explicit redirect URI on both legs.
    fn requires_redirect_uri(&self) -> bool {
        false
    }

    async fn authorization_url(
        &self,
        state: &str,
        code_verifier: &str,
        options: &AuthorizationOptions,
    ) -> Result<Url, ProviderError>;

    async fn validate_callback(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: Option<&str>,
    ) -> Result<CallbackOutcome, ProviderError>;

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenSet, ProviderError> {
        Err(ProviderError::unsupported(
            "provider does not support token refresh",
        ))
    }
}
