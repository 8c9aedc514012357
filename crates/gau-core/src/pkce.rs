//! PKCE and CSRF transaction material.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::distr::{Alphanumeric, SampleString};
use sha2::{Digest, Sha256};

const VERIFIER_ENTROPY_BYTES: usize = 32;
const NONCE_LEN: usize = 32;

/// A PKCE code verifier and its S256 challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh verifier from random entropy and derive its challenge.
    pub fn generate() -> Self {
        let mut entropy = [0u8; VERIFIER_ENTROPY_BYTES];
        rand::rng().fill_bytes(&mut entropy);
        let verifier = URL_SAFE_NO_PAD.encode(entropy);
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// S256 challenge: base64url(no pad) of the SHA-256 digest.
    pub fn challenge_for(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

/// Random alphanumeric CSRF nonce. Alphanumeric by construction, so it can
/// be embedded to the left of a `.` separator without ambiguity.
pub fn generate_nonce() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), NONCE_LEN)
}
