//! Compact JWT codec supporting HS256 and ES256.
//!
//! The verifier pins the algorithm at construction and rejects tokens whose
//! header declares anything else, so a token can never downgrade the check
//! to a weaker scheme. ES256 signatures are produced in raw `r || s` form
//! and accepted in either raw or DER form, since both encodings circulate.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Algorithm {
    #[default]
    Es256,
    Hs256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Es256 => "ES256",
            Algorithm::Hs256 => "HS256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared secret material. HS256 accepts text or raw bytes; ES256 requires
/// a text secret holding a base64url-encoded 32-byte P-256 scalar.
#[derive(Clone)]
pub enum Secret {
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret").finish_non_exhaustive()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret::Text(value.to_string())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret::Text(value)
    }
}

impl From<Vec<u8>> for Secret {
    fn from(value: Vec<u8>) -> Self {
        Secret::Bytes(value)
    }
}

/// Expected or embedded `aud` claim, either a single value or a list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, value: &str) -> bool {
        match self {
            Audience::One(aud) => aud == value,
            Audience::Many(auds) => auds.iter().any(|aud| aud == value),
        }
    }
}

impl From<&str> for Audience {
    fn from(value: &str) -> Self {
        Audience::One(value.to_string())
    }
}

impl From<Vec<String>> for Audience {
    fn from(value: Vec<String>) -> Self {
        Audience::Many(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("missing secret for {0} signing")]
    MissingSecret(&'static str),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("malformed token: {0}")]
    Malformed(&'static str),
    #[error("token algorithm `{found}` does not match verifier algorithm `{expected}`")]
    AlgorithmMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token issuer mismatch")]
    InvalidIssuer,
    #[error("token audience mismatch")]
    InvalidAudience,
    #[error("claims encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Codec construction input.
#[derive(Clone, Debug, Default)]
pub struct CodecOptions {
    pub algorithm: Algorithm,
    pub secret: Option<Secret>,
    /// Ready-made ES256 key pair; takes precedence over `secret`.
    pub key_pair: Option<SigningKey>,
    pub issuer: Option<String>,
    pub audience: Option<Audience>,
}

/// Per-token sign input layered on top of the codec configuration.
#[derive(Clone, Debug, Default)]
pub struct SignRequest {
    pub claims: Map<String, Value>,
    pub subject: Option<String>,
    /// Seconds until expiry. `exp` is only set for positive values; a
    /// non-positive or absent ttl yields a non-expiring token.
    pub ttl: Option<i64>,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug)]
enum KeyMaterial {
    Hmac(Vec<u8>),
    P256(Box<SigningKey>),
}

/// Signs and verifies compact three-segment tokens.
#[derive(Debug)]
pub struct TokenCodec {
    algorithm: Algorithm,
    keys: KeyMaterial,
    issuer: Option<String>,
    audience: Option<Audience>,
}

impl TokenCodec {
    pub fn new(options: CodecOptions) -> Result<Self, JwtError> {
        let keys = match options.algorithm {
            Algorithm::Hs256 => {
                let secret = options.secret.ok_or(JwtError::MissingSecret("HS256"))?;
                let bytes = match secret {
                    Secret::Text(text) => text.into_bytes(),
                    Secret::Bytes(bytes) => bytes,
                };
                KeyMaterial::Hmac(bytes)
            }
            Algorithm::Es256 => match options.key_pair {
                Some(key) => KeyMaterial::P256(Box::new(key)),
                None => match options.secret {
                    Some(Secret::Text(text)) => {
                        let bytes = URL_SAFE_NO_PAD.decode(text.as_bytes()).map_err(|_| {
                            JwtError::InvalidKey("ES256 secret is not valid base64url".into())
                        })?;
                        if bytes.len() != 32 {
                            return Err(JwtError::InvalidKey(
                                "ES256 secret must decode to 32 bytes".into(),
                            ));
                        }
                        let key = SigningKey::from_slice(&bytes).map_err(|err| {
                            JwtError::InvalidKey(format!("ES256 secret is not a valid key: {err}"))
                        })?;
                        KeyMaterial::P256(Box::new(key))
                    }
                    Some(Secret::Bytes(_)) => {
                        return Err(JwtError::InvalidKey(
                            "ES256 requires a string secret or an explicit key pair".into(),
                        ));
                    }
                    None => return Err(JwtError::MissingSecret("ES256")),
                },
            },
        };

        Ok(Self {
            algorithm: options.algorithm,
            keys,
            issuer: options.issuer,
            audience: options.audience,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Produce a signed compact token for the given claims.
    pub fn sign(&self, request: SignRequest) -> Result<String, JwtError> {
        let mut payload = request.claims;
        if let Some(subject) = request.subject {
            payload.insert("sub".into(), Value::String(subject));
        }
        let iat = current_epoch();
        payload.insert("iat".into(), Value::from(iat));
        if let Some(ttl) = request.ttl
            && ttl > 0
        {
            payload.insert("exp".into(), Value::from(iat + ttl));
        }
        if let Some(issuer) = &self.issuer {
            payload.insert("iss".into(), Value::String(issuer.clone()));
        }
        if let Some(audience) = &self.audience {
            payload.insert("aud".into(), serde_json::to_value(audience)?);
        }

        let header = Header {
            alg: self.algorithm.as_str().to_string(),
            typ: "JWT".to_string(),
        };
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?);
        let signing_input = format!("{header_b64}.{payload_b64}");

        let signature = match &self.keys {
            KeyMaterial::Hmac(key) => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .map_err(|err| JwtError::InvalidKey(err.to_string()))?;
                mac.update(signing_input.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            KeyMaterial::P256(key) => {
                let signature: Signature = key.sign(signing_input.as_bytes());
                signature.to_bytes().to_vec()
            }
        };

        let signature_b64 = URL_SAFE_NO_PAD.encode(signature);
        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Parse and verify a compact token, yielding the full claim payload.
    ///
    /// Validation order: algorithm pin, signature, `exp`, `nbf`, `iss`,
    /// `aud` intersection.
    pub fn verify(&self, token: &str) -> Result<Map<String, Value>, JwtError> {
        let mut segments = token.split('.');
        let header_b64 = segments
            .next()
            .ok_or(JwtError::Malformed("missing header segment"))?;
        let payload_b64 = segments
            .next()
            .ok_or(JwtError::Malformed("missing payload segment"))?;
        let signature_b64 = segments
            .next()
            .ok_or(JwtError::Malformed("missing signature segment"))?;
        if segments.next().is_some() {
            return Err(JwtError::Malformed("unexpected trailing segments"));
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64.as_bytes())
            .map_err(|_| JwtError::Malformed("header is not valid base64url"))?;
        let header: Header = serde_json::from_slice(&header_bytes)
            .map_err(|_| JwtError::Malformed("header is not valid JSON"))?;
        if header.alg != self.algorithm.as_str() {
            return Err(JwtError::AlgorithmMismatch {
                expected: self.algorithm.as_str(),
                found: header.alg,
            });
        }

        let signing_input = format!("{header_b64}.{payload_b64}");
        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature_b64.as_bytes())
            .map_err(|_| JwtError::Malformed("signature is not valid base64url"))?;

        match &self.keys {
            KeyMaterial::Hmac(key) => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .map_err(|err| JwtError::InvalidKey(err.to_string()))?;
                mac.update(signing_input.as_bytes());
                mac.verify_slice(&signature_bytes)
                    .map_err(|_| JwtError::InvalidSignature)?;
            }
            KeyMaterial::P256(key) => {
                // DER first so a 64-byte DER encoding is not mistaken for
                // a raw `r || s` pair.
                let signature = match Signature::from_der(&signature_bytes) {
                    Ok(signature) => signature,
                    Err(_) => Signature::from_slice(&signature_bytes)
                        .map_err(|_| JwtError::InvalidSignature)?,
                };
                let signature = signature.normalize_s().unwrap_or(signature);
                key.verifying_key()
                    .verify(signing_input.as_bytes(), &signature)
                    .map_err(|_| JwtError::InvalidSignature)?;
            }
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64.as_bytes())
            .map_err(|_| JwtError::Malformed("payload is not valid base64url"))?;
        let payload: Map<String, Value> = serde_json::from_slice(&payload_bytes)
            .map_err(|_| JwtError::Malformed("payload is not valid JSON"))?;

        let now = current_epoch();
        if let Some(exp) = payload.get("exp").and_then(Value::as_i64)
            && now >= exp
        {
            return Err(JwtError::Expired);
        }
        if let Some(nbf) = payload.get("nbf").and_then(Value::as_i64)
            && now < nbf
        {
            return Err(JwtError::NotYetValid);
        }
        if let Some(issuer) = &self.issuer {
            let token_issuer = payload.get("iss").and_then(Value::as_str);
            if token_issuer != Some(issuer.as_str()) {
                return Err(JwtError::InvalidIssuer);
            }
        }
        if let Some(expected) = &self.audience {
            let matched = match payload.get("aud") {
                Some(Value::String(aud)) => expected.contains(aud),
                Some(Value::Array(auds)) => auds
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|aud| expected.contains(aud)),
                _ => false,
            };
            if !matched {
                return Err(JwtError::InvalidAudience);
            }
        }

        Ok(payload)
    }
}

/// Generate a fresh random ES256 key pair.
pub fn generate_es256_key() -> SigningKey {
    loop {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        if let Ok(key) = SigningKey::from_slice(&bytes) {
            return key;
        }
    }
}

fn current_epoch() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
