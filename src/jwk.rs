//! Minimal RFC 7517 JSON Web Key support for RSA keys.
//!
//! Full JWK import/export is out of scope here, but [`crate::send::OutboxMessage`]
//! must round-trip a private key through JSON, so this module provides just enough:
//! converting between [`rsa::RsaPrivateKey`] and the `kty: "RSA"` JWK shape, using the same
//! `base64`/`rsa` dependencies already pulled in for signing.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64, Engine};
use rsa::{
    traits::{PrivateKeyParts, PublicKeyParts},
    BigUint, RsaPrivateKey,
};
use serde::{Deserialize, Serialize};

/// A JSON Web Key representing an RSA key pair (private key fields are optional so the same
/// struct can carry a public-only key if ever needed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    /// Key type, always `"RSA"` for keys produced by this module
    pub kty: String,
    /// Modulus, base64url-encoded big-endian bytes
    pub n: String,
    /// Public exponent, base64url-encoded big-endian bytes
    pub e: String,
    /// Private exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// First prime factor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    /// Second prime factor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
}

/// Errors converting between [`RsaPrivateKey`] and [`Jwk`].
#[derive(thiserror::Error, Debug)]
pub enum JwkError {
    /// The JWK was missing a field required to reconstruct a private key
    #[error("JWK is missing required field `{0}`")]
    MissingField(&'static str),
    /// A field could not be base64url-decoded
    #[error("JWK field `{0}` is not valid base64url")]
    InvalidBase64(&'static str),
    /// The key material was not a valid RSA key
    #[error(transparent)]
    Rsa(#[from] rsa::Error),
}

impl Jwk {
    /// Encode an RSA private key as a JWK.
    pub fn from_private_key(key: &RsaPrivateKey) -> Self {
        let primes = key.primes();
        Self {
            kty: "RSA".to_string(),
            n: encode(&key.n().to_bytes_be()),
            e: encode(&key.e().to_bytes_be()),
            d: Some(encode(&key.d().to_bytes_be())),
            p: primes.first().map(|p| encode(&p.to_bytes_be())),
            q: primes.get(1).map(|q| encode(&q.to_bytes_be())),
        }
    }

    /// Reconstruct an RSA private key from this JWK.
    pub fn to_private_key(&self) -> Result<RsaPrivateKey, JwkError> {
        let n = decode(&self.n, "n")?;
        let e = decode(&self.e, "e")?;
        let d = self
            .d
            .as_deref()
            .ok_or(JwkError::MissingField("d"))
            .and_then(|d| decode(d, "d"))?;
        let mut primes = Vec::new();
        if let Some(p) = &self.p {
            primes.push(decode(p, "p")?);
        }
        if let Some(q) = &self.q {
            primes.push(decode(q, "q")?);
        }
        let key = RsaPrivateKey::from_components(n, e, d, primes)?;
        Ok(key)
    }
}

fn encode(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

fn decode(value: &str, field: &'static str) -> Result<BigUint, JwkError> {
    let bytes = B64.decode(value).map_err(|_| JwkError::InvalidBase64(field))?;
    Ok(BigUint::from_bytes_be(&bytes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rsa::pkcs1::EncodeRsaPrivateKey;

    #[test]
    fn round_trips_through_jwk() {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let jwk = Jwk::from_private_key(&key);
        let decoded = jwk.to_private_key().unwrap();
        assert_eq!(key.to_pkcs1_der().unwrap().as_bytes(), decoded.to_pkcs1_der().unwrap().as_bytes());
    }

    #[test]
    fn round_trips_through_json() {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let jwk = Jwk::from_private_key(&key);
        let json = serde_json::to_string(&jwk).unwrap();
        let back: Jwk = serde_json::from_str(&json).unwrap();
        assert_eq!(jwk, back);
    }

    #[test]
    fn missing_private_exponent_errors() {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            n: encode(&[1, 2, 3]),
            e: encode(&[1, 0, 1]),
            d: None,
            p: None,
            q: None,
        };
        assert!(matches!(jwk.to_private_key(), Err(JwkError::MissingField("d"))));
    }
}
