pub mod oidc;

pub use oidc::{OidcConfig, OidcProvider};
