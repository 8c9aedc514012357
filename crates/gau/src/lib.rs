//! Embeddable OAuth2/OIDC authentication core.
//!
//! Hosts construct an [`Auth`] from an adapter, a set of providers, and a
//! signing secret, then mount [`router`] (or call [`handle`] directly) under
//! the configured base path. Everything else, the CSRF and PKCE transaction
//! cookies, the code exchange, account linking, and session issuance, is
//! driven from there.

pub mod adapters;
pub mod auth;
pub mod cors;
mod delivery;
pub mod error;
pub mod events;
mod handlers;
pub mod providers;
pub mod router;

pub use auth::{
    Auth, AuthOptions, AutoLink, DEFAULT_BASE_PATH, DEFAULT_TTL, RoleContext, RoleResolver,
    RolesConfig, ScopeProfile, SessionStrategy, TrustHosts,
};
pub use cors::{AllowedOrigins, CorsConfig};
pub use error::AppError;
pub use events::{AuthEvent, AuthEvents, NoopEvents};
pub use router::{handle, router};

pub use gau_core::{
    Account, AccountTokens, Adapter, AdapterError, Algorithm, Audience, AuthorizationOptions,
    CallbackOutcome, CodecOptions, CookieOptions, JwtError, NewUser, OAuthProvider, ProviderError,
    ProviderErrorKind, ProviderProfile, Secret, SessionData, SessionInfo, SigningKey, TokenSet,
    User, UserUpdate, generate_es256_key,
};
