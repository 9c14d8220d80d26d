//! HTTP Signatures ("cavage" draft) generation and verification.
//!
//! Outbound POSTs are signed over `(request-target) host date digest` with `rsa-sha256`;
//! inbound POSTs are verified the same way before dispatch. Built against the `rsa` crate rather
//! than `openssl`, to keep the whole crate pure-Rust.

use crate::error::Error;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use http::{header::HeaderName, uri::PathAndQuery, HeaderValue, Method, Uri};
use http_signature_normalization_reqwest::prelude::{Config, SignExt};
use once_cell::sync::Lazy;
use rsa::{
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    signature::{RandomizedSigner, SignatureEncoding, Verifier},
    RsaPrivateKey, RsaPublicKey,
};
use reqwest::Request;
use reqwest_middleware::RequestBuilder;
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, time::Duration};
use tracing::debug;
use url::Url;

/// A PEM-encoded RSA keypair, generated once per actor.
#[derive(Debug, Clone)]
pub struct Keypair {
    /// Private key, PKCS#8 PEM
    pub private_key: String,
    /// Public key, SPKI PEM
    pub public_key: String,
}

/// Generate a fresh 2048-bit RSA keypair for signing activities.
pub fn generate_actor_keypair() -> Result<Keypair, Error> {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).map_err(Error::other)?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok(Keypair {
        private_key: private_key
            .to_pkcs8_pem(Default::default())
            .map_err(Error::other)?
            .to_string(),
        public_key: public_key.to_public_key_pem(Default::default()).map_err(Error::other)?,
    })
}

/// Time for which an HTTP signature remains valid. One hour: generous enough to absorb clock
/// skew and retry delay without leaving stale signatures replayable indefinitely.
pub(crate) const EXPIRES_AFTER: Duration = Duration::from_secs(60 * 60);

/// Sign an outgoing request for `key_id` (an actor's `#main-key` URL) using `private_key_pem`.
/// `body` is hashed into the `Digest` header and included in the signed headers.
pub async fn sign_request(
    request_builder: RequestBuilder,
    key_id: &str,
    body: bytes::Bytes,
    private_key_pem: &str,
) -> Result<Request, Error> {
    static CONFIG: Lazy<Config> = Lazy::new(|| Config::new().set_expiration(EXPIRES_AFTER));

    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem).map_err(Error::other)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let key_id = key_id.to_string();

    request_builder
        .signature_with_digest(
            CONFIG.clone(),
            key_id,
            Sha256::new(),
            body,
            move |signing_string: String| {
                let mut rng = rand::rngs::OsRng;
                let signature: Signature =
                    signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
                Ok(B64.encode(signature.to_vec())) as Result<_, anyhow::Error>
            },
        )
        .await
        .map_err(Error::other)
}

/// Verify the `Signature` header on an incoming request against `public_key_pem`.
pub fn verify_signature<'a, H>(
    headers: H,
    method: &Method,
    uri: &Uri,
    public_key_pem: &str,
) -> Result<(), Error>
where
    H: IntoIterator<Item = (&'a HeaderName, &'a HeaderValue)>,
{
    let mut header_map = BTreeMap::<String, String>::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            header_map.insert(name.to_string(), value.to_string());
        }
    }

    static CONFIG: Lazy<http_signature_normalization::Config> =
        Lazy::new(|| http_signature_normalization::Config::new().set_expiration(EXPIRES_AFTER));

    let path_and_query = uri.path_and_query().map(PathAndQuery::as_str).unwrap_or("");
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem).map_err(Error::other)?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);

    let verified = CONFIG
        .begin_verify(method.as_str(), path_and_query, header_map)
        .map_err(Error::other)?
        .verify(|signature, signing_string| -> anyhow::Result<bool> {
            debug!("verifying signature over: {signing_string}");
            let decoded = B64.decode(signature)?;
            let signature = Signature::try_from(decoded.as_slice())?;
            Ok(verifying_key
                .verify(signing_string.as_bytes(), &signature)
                .is_ok())
        })
        .map_err(Error::other)?;

    if verified {
        Ok(())
    } else {
        Err(Error::SignatureInvalid)
    }
}

/// Extract the actor URL embedded in a `Signature` header's `keyId` parameter, without
/// performing verification. Used to look up the claimed signer before fetching their key.
pub fn signing_key_owner(headers: &http::HeaderMap) -> Result<Url, Error> {
    let signature = headers
        .get("signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::SignatureInvalid)?;
    static KEY_ID_RE: Lazy<regex::Regex> =
        Lazy::new(|| regex::Regex::new("keyId=\"([^\"]+)#([^\"]+)\"").expect("valid regex"));
    let actor_id = KEY_ID_RE
        .captures(signature)
        .and_then(|c| c.get(1))
        .ok_or(Error::SignatureInvalid)?
        .as_str();
    Url::parse(actor_id).map_err(|_| Error::SignatureInvalid)
}

#[derive(Clone, Debug)]
struct DigestPart {
    digest: String,
}

impl DigestPart {
    fn try_from_header(h: &HeaderValue) -> Option<Vec<DigestPart>> {
        let h = h.to_str().ok()?.split(';').next()?;
        let parts = h
            .split(',')
            .filter_map(|p| {
                let mut iter = p.splitn(2, '=');
                let alg = iter.next()?;
                let value = iter.next()?;
                if alg.eq_ignore_ascii_case("sha-256") {
                    Some(DigestPart {
                        digest: value.to_string(),
                    })
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        if parts.is_empty() {
            None
        } else {
            Some(parts)
        }
    }
}

/// Verify that `body`'s SHA-256 digest matches the `Digest` header.
pub fn verify_body_digest(digest_header: Option<&HeaderValue>, body: &[u8]) -> Result<(), Error> {
    let parts = digest_header
        .and_then(DigestPart::try_from_header)
        .ok_or(Error::SignatureInvalid)?;
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(body);
        if B64.encode(hasher.finalize_reset()) != part.digest {
            return Err(Error::SignatureInvalid);
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::Client;
    use reqwest_middleware::ClientWithMiddleware;
    use std::str::FromStr;

    #[tokio::test]
    async fn sign_then_verify_round_trips() {
        let keypair = generate_actor_keypair().unwrap();
        let client = ClientWithMiddleware::from(Client::new());
        let builder = client
            .post("https://example.com/u/alice/inbox")
            .header("host", "example.com")
            .header("date", httpdate::fmt_http_date(std::time::SystemTime::now()));
        let request = sign_request(
            builder,
            "https://example.com/u/alice#main-key",
            bytes::Bytes::from_static(b"hello world"),
            &keypair.private_key,
        )
        .await
        .unwrap();

        let valid = verify_signature(
            request.headers(),
            request.method(),
            &Uri::from_str(request.url().as_str()).unwrap(),
            &keypair.public_key,
        );
        assert!(valid.is_ok());
    }

    #[test]
    fn verify_body_digest_rejects_tampered_body() {
        let digest = HeaderValue::from_static("SHA-256=lzFT+G7C2hdI5j8M+FuJg1tC+O6AGMVJhooTCKGfbKM=");
        let body = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.";
        assert!(verify_body_digest(Some(&digest), body).is_ok());
        assert!(verify_body_digest(Some(&digest), b"tampered").is_err());
    }

    #[test]
    fn signing_key_owner_parses_key_id() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            "signature",
            HeaderValue::from_static(
                "keyId=\"https://example.com/u/alice#main-key\",algorithm=\"hs2019\",headers=\"(request-target)\",signature=\"abc\"",
            ),
        );
        let owner = signing_key_owner(&headers).unwrap();
        assert_eq!(owner.as_str(), "https://example.com/u/alice");
    }
}
