//! Registry and router core for building ActivityPub-federated servers.
//!
//! This crate is the framework-agnostic middle layer between an HTTP server and an
//! ActivityStreams-speaking application: a [`router::Router`] for matching and minting the fixed
//! set of federation surfaces, a [`federation::Federation`] registry tying dispatchers to those
//! surfaces, and the HTTP-signature, queueing and caching plumbing both depend on. Framework glue
//! lives behind the `axum`/`actix-web` features; everything else is framework-agnostic.

pub mod activity;
pub mod callback;
pub mod context;
pub mod docloader;
pub mod error;
pub mod federation;
pub mod handlers;
pub mod jwk;
pub mod kv;
pub mod nodeinfo;
pub mod queue;
pub mod router;
pub mod send;
pub mod signatures;
pub mod testing;
pub mod webfinger;

#[cfg(feature = "axum")]
pub mod axum;

#[cfg(feature = "actix-web")]
pub mod actix_web;

pub use error::Error;
pub use federation::{Federation, FederationConfig, FederationConfigBuilder, FetchOptions};

/// Media type federated documents are served and accepted as, per ActivityStreams 2.0.
pub static FEDERATION_CONTENT_TYPE: &str = "application/activity+json";

/// A framework-agnostic inbound HTTP request, the input to [`Federation::fetch`].
///
/// Keeps the registry itself framework-agnostic, pushing framework-specific request/response
/// conversion into the small `axum`/`actix_web` adapter modules instead.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method
    pub method: http::Method,
    /// Full request URL, including scheme and host
    pub url: url::Url,
    /// Request headers
    pub headers: http::HeaderMap,
    /// Raw request body
    pub body: bytes::Bytes,
}

/// A framework-agnostic outbound HTTP response, returned by [`Federation::fetch`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: http::StatusCode,
    /// Response headers
    pub headers: http::HeaderMap,
    /// Raw response body
    pub body: bytes::Bytes,
}

impl HttpResponse {
    /// An empty response with just a status code.
    pub fn status(status: http::StatusCode) -> Self {
        Self {
            status,
            headers: http::HeaderMap::new(),
            body: bytes::Bytes::new(),
        }
    }

    /// A JSON body response with the given status and content type.
    pub fn json(status: http::StatusCode, content_type: &str, value: &impl serde::Serialize) -> Result<Self, Error> {
        let body = serde_json::to_vec(value)?;
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_str(content_type).map_err(Error::other)?,
        );
        Ok(Self {
            status,
            headers,
            body: bytes::Bytes::from(body),
        })
    }

    /// An empty response carrying `Vary: Accept, Signature`, used for the 406/401 defaults spec
    /// §4.G requires content-negotiation and authorization failures to advertise.
    pub fn status_with_vary(status: http::StatusCode) -> Self {
        let mut response = Self::status(status);
        response.headers.insert(
            http::header::VARY,
            http::HeaderValue::from_static("Accept, Signature"),
        );
        response
    }
}
