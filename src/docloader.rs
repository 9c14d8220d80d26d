//! JSON-LD document fetching, with an authenticated variant and a KV-backed cache.
//!
//! The JSON-LD document loader itself is a pluggable collaborator; what the core needs is a
//! concrete default so `Context::document_loader` has something to return. Kept as a small trait
//! so tests can swap in a fake loader.

use crate::{
    error::Error,
    kv::{KvPrefixes, KvStore, KvStoreExt, SetOptions},
    signatures::sign_request,
    FEDERATION_CONTENT_TYPE,
};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use url::Url;

/// A fetched JSON-LD document plus the bookkeeping fields used for re-contextualization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// The parsed JSON-LD document
    pub document: serde_json::Value,
    /// The `@context` URL, if the document referenced one externally
    pub context_url: Option<Url>,
    /// The final URL the document was fetched from (after redirects)
    pub document_url: Url,
    /// Unix-epoch seconds after which this entry should be considered stale
    pub expires_at: i64,
}

/// Fetches a remote JSON-LD document by URL.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Fetch and parse the document at `url`.
    async fn load_document(&self, url: &Url) -> Result<RemoteDocument, Error>;
}

/// Default document loader: a plain authenticated-or-not GET with content negotiation, built on
/// the same `reqwest-middleware` client the rest of the crate uses for outbound HTTP.
pub struct ReqwestDocumentLoader {
    client: ClientWithMiddleware,
    signing: Option<(String, String)>,
    request_timeout: Duration,
}

impl ReqwestDocumentLoader {
    /// Build an unauthenticated loader.
    pub fn new(client: ClientWithMiddleware, request_timeout: Duration) -> Self {
        Self {
            client,
            signing: None,
            request_timeout,
        }
    }

    /// Build a loader that signs its GET requests as `key_id` using `private_key_pem`, for
    /// fetching documents that require actor authentication to read.
    pub fn authenticated(
        client: ClientWithMiddleware,
        request_timeout: Duration,
        key_id: String,
        private_key_pem: String,
    ) -> Self {
        Self {
            client,
            signing: Some((key_id, private_key_pem)),
            request_timeout,
        }
    }
}

#[async_trait]
impl DocumentLoader for ReqwestDocumentLoader {
    async fn load_document(&self, url: &Url) -> Result<RemoteDocument, Error> {
        debug!("fetching remote document {url}");
        let builder = self
            .client
            .get(url.as_str())
            .timeout(self.request_timeout)
            .header("accept", FEDERATION_CONTENT_TYPE);

        let response = if let Some((key_id, private_key_pem)) = &self.signing {
            let request = sign_request(builder, key_id, bytes::Bytes::new(), private_key_pem).await?;
            self.client.execute(request).await?
        } else {
            builder.send().await?
        };

        if !response.status().is_success() {
            return Err(Error::FetchFailed(url.clone(), response.status().to_string()));
        }
        let document_url = response.url().clone();
        let document: serde_json::Value = response.json().await?;
        let context_url = document
            .get("@context")
            .and_then(|v| v.as_str())
            .and_then(|s| Url::parse(s).ok());

        Ok(RemoteDocument {
            document,
            context_url,
            document_url,
            expires_at: now_unix() + 60 * 60,
        })
    }
}

/// Wraps any [`DocumentLoader`] with a cache under the `remoteDocument` KV prefix, so repeated
/// dereferences of the same URL within a process don't re-fetch.
pub struct KvCachedDocumentLoader<L> {
    inner: L,
    kv: Arc<dyn KvStore>,
    prefix: Vec<String>,
}

impl<L: DocumentLoader> KvCachedDocumentLoader<L> {
    /// Wrap `inner`, caching under `prefixes.remote_document`.
    pub fn new(inner: L, kv: Arc<dyn KvStore>, prefixes: &KvPrefixes) -> Self {
        Self {
            inner,
            kv,
            prefix: prefixes.remote_document.clone(),
        }
    }

    fn key_for(&self, url: &Url) -> Vec<String> {
        let mut key = self.prefix.clone();
        key.push(url.to_string());
        key
    }
}

#[async_trait]
impl<L: DocumentLoader> DocumentLoader for KvCachedDocumentLoader<L> {
    async fn load_document(&self, url: &Url) -> Result<RemoteDocument, Error> {
        let key = self.key_for(url);
        if let Some(cached) = self.kv.get_json::<RemoteDocument>(&key).await {
            if cached.expires_at > now_unix() {
                debug!("document cache hit for {url}");
                return Ok(cached);
            }
        }
        let document = self.inner.load_document(url).await?;
        self.kv.set_json(&key, &document, SetOptions::default()).await;
        Ok(document)
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::kv::TestKvStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DocumentLoader for CountingLoader {
        async fn load_document(&self, url: &Url) -> Result<RemoteDocument, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteDocument {
                document: serde_json::json!({"id": url.to_string()}),
                context_url: None,
                document_url: url.clone(),
                expires_at: now_unix() + 3600,
            })
        }
    }

    #[tokio::test]
    async fn caches_repeated_fetches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = CountingLoader { calls: calls.clone() };
        let kv: Arc<dyn KvStore> = Arc::new(TestKvStore::new());
        let loader = KvCachedDocumentLoader::new(inner, kv, &KvPrefixes::default());
        let url = Url::parse("https://example.com/actor").unwrap();
        loader.load_document(&url).await.unwrap();
        loader.load_document(&url).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
