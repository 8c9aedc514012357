//! The long-lived Auth context: configuration resolved once at startup,
//! plus the session and access-token operations built on top of it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::warn;

use gau_core::cookies::{CSRF_MAX_AGE, CookieOptions, Cookies, SameSite, parse_cookies};
use gau_core::jwt::{Algorithm, Audience, CodecOptions, JwtError, Secret, SignRequest, TokenCodec};
use gau_core::{
    AccountTokens, Adapter, AdapterError, OAuthProvider, ProviderProfile, SessionData, SessionInfo,
    SigningKey, User,
};

use crate::cors::CorsConfig;
use crate::events::{AuthEvent, AuthEvents, NoopEvents};

pub const DEFAULT_BASE_PATH: &str = "/api/auth";
pub const DEFAULT_TTL: i64 = 60 * 60 * 24;

/// Hosts trusted for redirect targets and cross-origin POSTs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustHosts {
    All,
    List(Vec<String>),
}

impl Default for TrustHosts {
    fn default() -> Self {
        TrustHosts::List(Vec::new())
    }
}

impl TrustHosts {
    pub fn contains(&self, host: &str) -> bool {
        match self {
            TrustHosts::All => true,
            TrustHosts::List(hosts) => hosts.iter().any(|h| h == host),
        }
    }
}

/// Policy for attaching a new OAuth identity to an existing user by email.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AutoLink {
    #[default]
    VerifiedEmail,
    Always,
    Never,
}

/// How a completed exchange hands the session token to the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionStrategy {
    #[default]
    Auto,
    Cookie,
    Token,
}

/// Context handed to the role resolver when a user is created.
pub struct RoleContext<'a> {
    pub provider_id: &'a str,
    pub profile: &'a ProviderProfile,
}

pub type RoleResolver = Arc<dyn Fn(&RoleContext<'_>) -> Option<String> + Send + Sync>;

/// Role tagging policy: the default role for new users plus admin lists
/// backing the helper predicates.
#[derive(Clone)]
pub struct RolesConfig {
    pub default_role: String,
    pub resolve_on_create: Option<RoleResolver>,
    pub admin_roles: Vec<String>,
    pub admin_user_ids: Vec<String>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            default_role: "user".to_string(),
            resolve_on_create: None,
            admin_roles: vec!["admin".to_string()],
            admin_user_ids: Vec::new(),
        }
    }
}

/// Named scope/redirect override selectable via the `profile` query
/// parameter on sign-in.
#[derive(Clone, Debug, Default)]
pub struct ScopeProfile {
    pub scopes: Option<Vec<String>>,
    pub redirect_uri: Option<String>,
}

/// Construction input for [`Auth`]. Unset fields take the documented
/// defaults.
pub struct AuthOptions {
    pub adapter: Arc<dyn Adapter>,
    pub providers: Vec<Arc<dyn OAuthProvider>>,
    pub base_path: Option<String>,
    pub algorithm: Option<Algorithm>,
    pub secret: Option<Secret>,
    pub key_pair: Option<SigningKey>,
    pub issuer: Option<String>,
    pub audience: Option<Audience>,
    /// Default session ttl in seconds.
    pub ttl: Option<i64>,
    pub trust_hosts: Option<TrustHosts>,
    pub auto_link: Option<AutoLink>,
    pub session_strategy: Option<SessionStrategy>,
    pub development: bool,
    pub cookie_options: Option<CookieOptions>,
    pub roles: Option<RolesConfig>,
    /// `None` disables CORS headers entirely.
    pub cors: Option<CorsConfig>,
    /// Per-provider named scope/redirect profiles.
    pub profiles: HashMap<String, HashMap<String, ScopeProfile>>,
    pub events: Option<Arc<dyn AuthEvents>>,
}

impl AuthOptions {
    pub fn new(adapter: Arc<dyn Adapter>, providers: Vec<Arc<dyn OAuthProvider>>) -> Self {
        Self {
            adapter,
            providers,
            base_path: None,
            algorithm: None,
            secret: None,
            key_pair: None,
            issuer: None,
            audience: None,
            ttl: None,
            trust_hosts: None,
            auto_link: None,
            session_strategy: None,
            development: false,
            cookie_options: None,
            roles: None,
            cors: Some(CorsConfig::default()),
            profiles: HashMap::new(),
            events: None,
        }
    }
}

/// The process-wide authentication context. Immutable after construction;
/// tests needing different policies build a fresh context via the
/// `with_*` constructors.
pub struct Auth {
    adapter: Arc<dyn Adapter>,
    providers: Vec<Arc<dyn OAuthProvider>>,
    codec: TokenCodec,
    base_path: String,
    ttl: i64,
    trust_hosts: TrustHosts,
    auto_link: AutoLink,
    session_strategy: SessionStrategy,
    development: bool,
    cookie_defaults: CookieOptions,
    roles: RolesConfig,
    cors: Option<CorsConfig>,
    profiles: HashMap<String, HashMap<String, ScopeProfile>>,
    events: Arc<dyn AuthEvents>,
}

impl Auth {
    pub fn new(options: AuthOptions) -> Result<Self, JwtError> {
        let development = options.development;
        let codec = TokenCodec::new(CodecOptions {
            algorithm: options.algorithm.unwrap_or_default(),
            secret: options.secret,
            key_pair: options.key_pair,
            issuer: options.issuer,
            audience: options.audience,
        })?;

        let default_cookie_options = CookieOptions {
            path: Some("/".to_string()),
            http_only: Some(true),
            secure: Some(!development),
            same_site: Some(SameSite::Lax),
            ..CookieOptions::default()
        };
        let cookie_defaults = options
            .cookie_options
            .map(|overrides| overrides.merged_over(&default_cookie_options))
            .unwrap_or(default_cookie_options);

        Ok(Self {
            adapter: options.adapter,
            providers: options.providers,
            codec,
            base_path: options
                .base_path
                .unwrap_or_else(|| DEFAULT_BASE_PATH.to_string()),
            ttl: options.ttl.unwrap_or(DEFAULT_TTL),
            trust_hosts: options.trust_hosts.unwrap_or_default(),
            auto_link: options.auto_link.unwrap_or_default(),
            session_strategy: options.session_strategy.unwrap_or_default(),
            development,
            cookie_defaults,
            roles: options.roles.unwrap_or_default(),
            cors: options.cors,
            profiles: options.profiles,
            events: options.events.unwrap_or_else(|| Arc::new(NoopEvents)),
        })
    }

    /// Rebuild with a different trust policy. Intended for tests.
    pub fn with_trust_hosts(mut self, trust_hosts: TrustHosts) -> Self {
        self.trust_hosts = trust_hosts;
        self
    }

    /// Rebuild with a different auto-link policy. Intended for tests.
    pub fn with_auto_link(mut self, auto_link: AutoLink) -> Self {
        self.auto_link = auto_link;
        self
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn provider(&self, id: &str) -> Option<&Arc<dyn OAuthProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn scope_profile(&self, provider_id: &str, profile: &str) -> Option<&ScopeProfile> {
        self.profiles.get(provider_id)?.get(profile)
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    pub fn trust_hosts(&self) -> &TrustHosts {
        &self.trust_hosts
    }

    pub fn auto_link(&self) -> AutoLink {
        self.auto_link
    }

    pub fn session_strategy(&self) -> SessionStrategy {
        self.session_strategy
    }

    pub fn development(&self) -> bool {
        self.development
    }

    pub fn cors(&self) -> Option<&CorsConfig> {
        self.cors.as_ref()
    }

    pub fn roles(&self) -> &RolesConfig {
        &self.roles
    }

    pub(crate) async fn emit(&self, event: AuthEvent) {
        self.events.emit(event).await;
    }

    /// Jar over the request's `Cookie` header with this context's defaults.
    pub fn request_cookies(&self, header: Option<&str>) -> Cookies {
        Cookies::new(parse_cookies(header), self.cookie_defaults.clone())
    }

    /// Attributes for short-lived transaction cookies.
    pub(crate) fn transaction_cookie_options(&self) -> CookieOptions {
        CookieOptions {
            max_age: Some(CSRF_MAX_AGE),
            same_site: Some(self.cross_site_same_site()),
            secure: Some(!self.development),
            ..CookieOptions::default()
        }
    }

    /// Attributes for the session cookie.
    pub(crate) fn session_cookie_options(&self) -> CookieOptions {
        CookieOptions {
            max_age: Some(self.ttl),
            same_site: Some(self.cross_site_same_site()),
            secure: Some(!self.development),
            ..CookieOptions::default()
        }
    }

    /// Cross-site cookies need `SameSite=None` in production; development
    /// runs over plain http where `None` requires `Secure` and would drop.
    pub(crate) fn cross_site_same_site(&self) -> SameSite {
        if self.development {
            SameSite::Lax
        } else {
            SameSite::None
        }
    }

    /// Sign a session token with `sub` set to the user id.
    pub fn create_session(
        &self,
        user_id: &str,
        extra_claims: Map<String, Value>,
        ttl: Option<i64>,
    ) -> Result<String, JwtError> {
        self.codec.sign(SignRequest {
            claims: extra_claims,
            subject: Some(user_id.to_string()),
            ttl: Some(ttl.unwrap_or(self.ttl)),
        })
    }

    /// Verify a token and load the user-and-accounts tuple behind it.
    /// Invalid or expired tokens and vanished users yield `Ok(None)`;
    /// only storage failures surface as errors.
    pub async fn validate_session(
        &self,
        token: &str,
    ) -> Result<Option<SessionData>, AdapterError> {
        let Ok(claims) = self.codec.verify(token) else {
            return Ok(None);
        };
        let Some(user_id) = claims.get("sub").and_then(Value::as_str) else {
            return Ok(None);
        };
        match self.adapter.get_user_and_accounts(user_id).await? {
            Some((user, accounts)) => Ok(Some(SessionData {
                user,
                session: SessionInfo {
                    id: token.to_string(),
                    claims,
                },
                accounts,
            })),
            None => Ok(None),
        }
    }

    /// Return a usable access token for (user, provider), refreshing an
    /// expired one when possible. Every failure is swallowed into `None`;
    /// the event hook carries the reasons.
    pub async fn get_access_token(&self, user_id: &str, provider_id: &str) -> Option<String> {
        let accounts = match self.adapter.get_accounts(user_id).await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(user_id, provider_id, error = %err, "account lookup failed");
                return None;
            }
        };
        let account = accounts.into_iter().find(|a| a.provider == provider_id)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let expired = account.expires_at.is_some_and(|expires_at| expires_at <= now);
        if !expired {
            return account.access_token;
        }

        let refresh_token = account.refresh_token.clone()?;
        let provider = self.provider(provider_id)?;
        let refreshed = match provider.refresh_access_token(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(user_id, provider_id, error = %err, "token refresh failed");
                self.emit(AuthEvent::RefreshFailed {
                    user_id: user_id.to_string(),
                    provider: provider_id.to_string(),
                    reason: err.to_string(),
                })
                .await;
                return None;
            }
        };

        let rotation = AccountTokens {
            access_token: Some(refreshed.access_token.clone()),
            refresh_token: refreshed.refresh_token.clone().or(Some(refresh_token)),
            id_token: refreshed.id_token.clone(),
            expires_at: refreshed.expires_at,
            scope: refreshed.scope.clone().or(account.scope),
        };
        match self
            .adapter
            .update_account(provider_id, &account.provider_account_id, rotation)
            .await
        {
            Ok(()) | Err(AdapterError::Unsupported(_)) => {}
            Err(err) => {
                warn!(user_id, provider_id, error = %err, "rotated token persistence failed");
                self.emit(AuthEvent::AccountUpdateFailed {
                    user_id: user_id.to_string(),
                    provider: provider_id.to_string(),
                    reason: err.to_string(),
                })
                .await;
                return None;
            }
        }

        Some(refreshed.access_token)
    }

    /// Whether the user carries an admin role or id under the role policy.
    pub fn is_admin(&self, user: &User) -> bool {
        if self.roles.admin_user_ids.iter().any(|id| id == &user.id) {
            return true;
        }
        user.role
            .as_ref()
            .is_some_and(|role| self.roles.admin_roles.iter().any(|r| r == role))
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), AdapterError> {
        self.adapter.delete_user(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use gau_core::{
        Account, AuthorizationOptions, CallbackOutcome, NewUser, ProviderError, TokenSet,
    };
    use url::Url;

    use crate::adapters::MemoryAdapter;

    struct ScriptedProvider {
        refresh_calls: AtomicUsize,
        refresh_result: Result<TokenSet, ()>,
    }

    impl ScriptedProvider {
        fn refreshing_to(tokens: TokenSet) -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                refresh_result: Ok(tokens),
            }
        }

        fn failing() -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                refresh_result: Err(()),
            }
        }
    }

    #[async_trait]
    impl OAuthProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn authorization_url(
            &self,
            _state: &str,
            _code_verifier: &str,
            _options: &AuthorizationOptions,
        ) -> Result<Url, ProviderError> {
            Url::parse("https://idp.example.com/authorize")
                .map_err(|err| ProviderError::configuration(err.to_string()))
        }

        async fn validate_callback(
            &self,
            _code: &str,
            _code_verifier: &str,
            _redirect_uri: Option<&str>,
        ) -> Result<CallbackOutcome, ProviderError> {
            Err(ProviderError::authorization("not scripted"))
        }

        async fn refresh_access_token(
            &self,
            _refresh_token: &str,
        ) -> Result<TokenSet, ProviderError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            match &self.refresh_result {
                Ok(tokens) => Ok(tokens.clone()),
                Err(()) => Err(ProviderError::authorization("refresh token revoked")),
            }
        }
    }

    #[derive(Default)]
    struct RecordingEvents {
        events: std::sync::Mutex<Vec<AuthEvent>>,
    }

    impl RecordingEvents {
        fn recorded(&self) -> Vec<AuthEvent> {
            self.events.lock().expect("events lock").clone()
        }
    }

    #[async_trait]
    impl AuthEvents for RecordingEvents {
        async fn emit(&self, event: AuthEvent) {
            self.events.lock().expect("events lock").push(event);
        }
    }

    fn build_auth(provider: Arc<ScriptedProvider>) -> (Auth, Arc<MemoryAdapter>) {
        let adapter = Arc::new(MemoryAdapter::new());
        let mut options = AuthOptions::new(adapter.clone(), vec![provider]);
        options.algorithm = Some(Algorithm::Hs256);
        options.secret = Some(Secret::from("unit-test-secret"));
        let auth = Auth::new(options).expect("auth");
        (auth, adapter)
    }

    async fn seed_user(adapter: &MemoryAdapter, account: Account) -> String {
        let user = adapter
            .create_user(NewUser::default())
            .await
            .expect("create user");
        adapter
            .link_account(Account {
                user_id: user.id.clone(),
                ..account
            })
            .await
            .expect("link");
        user.id
    }

    fn scripted_account(expires_at: Option<i64>) -> Account {
        Account {
            user_id: String::new(),
            provider: "scripted".into(),
            provider_account_id: "acct-1".into(),
            access_token: Some("stored-at".into()),
            refresh_token: Some("stored-rt".into()),
            id_token: None,
            expires_at,
            scope: Some("openid".into()),
            token_type: None,
        }
    }

    #[tokio::test]
    async fn session_roundtrip_returns_user_and_accounts() {
        let (auth, adapter) = build_auth(Arc::new(ScriptedProvider::failing()));
        let user_id = seed_user(&adapter, scripted_account(None)).await;

        let token = auth
            .create_session(&user_id, Map::new(), None)
            .expect("token");
        let session = auth
            .validate_session(&token)
            .await
            .expect("validate")
            .expect("session");

        assert_eq!(session.user.id, user_id);
        assert_eq!(session.accounts.len(), 1);
        assert_eq!(session.session.id, token);
        assert_eq!(
            session.session.claims.get("sub").and_then(Value::as_str),
            Some(user_id.as_str())
        );
    }

    #[tokio::test]
    async fn garbage_token_yields_no_session() {
        let (auth, _adapter) = build_auth(Arc::new(ScriptedProvider::failing()));
        let session = auth
            .validate_session("not.a.token")
            .await
            .expect("validate");
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn session_for_vanished_user_yields_none() {
        let (auth, _adapter) = build_auth(Arc::new(ScriptedProvider::failing()));
        let token = auth
            .create_session("ghost", Map::new(), None)
            .expect("token");
        let session = auth.validate_session(&token).await.expect("validate");
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn fresh_access_token_served_without_refresh() {
        let far_future = OffsetDateTime::now_utc().unix_timestamp() + 3600;
        let provider = Arc::new(ScriptedProvider::failing());
        let (auth, adapter) = build_auth(provider.clone());
        let user_id = seed_user(&adapter, scripted_account(Some(far_future))).await;

        let token = auth.get_access_token(&user_id, "scripted").await;
        assert_eq!(token.as_deref(), Some("stored-at"));
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_access_token_refreshed_and_persisted() {
        let provider = Arc::new(ScriptedProvider::refreshing_to(TokenSet {
            access_token: "fresh-at".into(),
            expires_at: Some(OffsetDateTime::now_utc().unix_timestamp() + 3600),
            ..TokenSet::default()
        }));
        let (auth, adapter) = build_auth(provider.clone());
        let user_id = seed_user(&adapter, scripted_account(Some(1))).await;

        let token = auth.get_access_token(&user_id, "scripted").await;
        assert_eq!(token.as_deref(), Some("fresh-at"));
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);

        // Rotation kept the old refresh token since none was reissued.
        let accounts = adapter.get_accounts(&user_id).await.expect("accounts");
        assert_eq!(accounts[0].access_token.as_deref(), Some("fresh-at"));
        assert_eq!(accounts[0].refresh_token.as_deref(), Some("stored-rt"));

        // The stored token is now current, so no second refresh happens.
        let again = auth.get_access_token(&user_id, "scripted").await;
        assert_eq!(again.as_deref(), Some("fresh-at"));
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_yields_none_and_reports_through_the_hook() {
        let provider = Arc::new(ScriptedProvider::failing());
        let recorder = Arc::new(RecordingEvents::default());
        let adapter = Arc::new(MemoryAdapter::new());
        let mut options = AuthOptions::new(adapter.clone(), vec![provider.clone()]);
        options.algorithm = Some(Algorithm::Hs256);
        options.secret = Some(Secret::from("unit-test-secret"));
        options.events = Some(recorder.clone());
        let auth = Auth::new(options).expect("auth");
        let user_id = seed_user(&adapter, scripted_account(Some(1))).await;

        let token = auth.get_access_token(&user_id, "scripted").await;
        assert!(token.is_none());
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);

        let events = recorder.recorded();
        assert!(events.iter().any(|event| matches!(
            event,
            AuthEvent::RefreshFailed { user_id: failed, provider, .. }
                if failed == &user_id && provider == "scripted"
        )));
    }

    #[tokio::test]
    async fn unknown_provider_yields_none() {
        let (auth, adapter) = build_auth(Arc::new(ScriptedProvider::failing()));
        let user_id = seed_user(&adapter, scripted_account(None)).await;
        assert!(auth.get_access_token(&user_id, "absent").await.is_none());
    }

    #[test]
    fn admin_detection_by_role_and_id() {
        let adapter = Arc::new(MemoryAdapter::new());
        let mut options = AuthOptions::new(adapter, Vec::new());
        options.algorithm = Some(Algorithm::Hs256);
        options.secret = Some(Secret::from("unit-test-secret"));
        options.roles = Some(RolesConfig {
            admin_user_ids: vec!["root-1".into()],
            ..RolesConfig::default()
        });
        let auth = Auth::new(options).expect("auth");

        let admin_by_role = User {
            id: "u1".into(),
            role: Some("admin".into()),
            ..User::default()
        };
        let admin_by_id = User {
            id: "root-1".into(),
            ..User::default()
        };
        let plain = User {
            id: "u2".into(),
            role: Some("user".into()),
            ..User::default()
        };
        assert!(auth.is_admin(&admin_by_role));
        assert!(auth.is_admin(&admin_by_id));
        assert!(!auth.is_admin(&plain));
    }
}
