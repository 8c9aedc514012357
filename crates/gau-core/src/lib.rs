//! Core contracts and primitives for the `gau` authentication library:
//! the token codec, cookie jar, PKCE material, and the provider and
//! storage adapter traits the embeddable layer drives.

pub mod adapter;
pub mod cookies;
pub mod jwt;
pub mod pkce;
pub mod provider;
pub mod types;

pub use adapter::{AccountTokens, Adapter, AdapterError, UserUpdate};
pub use cookies::{CookieOptions, Cookies, SameSite, parse_cookies};
pub use jwt::{
    Algorithm, Audience, CodecOptions, JwtError, Secret, SignRequest, TokenCodec,
    generate_es256_key,
};
pub use pkce::{PkcePair, generate_nonce};
pub use provider::{
    AuthorizationOptions, CallbackOutcome, OAuthProvider, ProviderError, ProviderErrorKind,
    ProviderProfile, TokenSet,
};
pub use types::{Account, NewUser, SessionData, SessionInfo, User};

/// Re-exported so hosts can construct explicit ES256 key pairs.
pub use p256::ecdsa::SigningKey;
