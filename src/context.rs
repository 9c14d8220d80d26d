//! The context factory handed to every dispatcher, listener and handler.
//!
//! `Context<T>` is a cheap-to-clone handle onto the registry's shared state (router, KV store,
//! queue, HTTP client) plus the caller's own `data: T`. `RequestContext<T>` extends it with the
//! inbound request for handlers that need to inspect or re-verify it: a `Deref`-to-app-data
//! handle passed to every handler, widened with the URL-building and dispatch re-entry this
//! crate's request lifecycle needs.

use crate::{
    callback::{CryptographicKey, KeyPair},
    docloader::{DocumentLoader, KvCachedDocumentLoader, ReqwestDocumentLoader},
    error::Error,
    federation::FederationInner,
    send::{self, SendOptions},
};
use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex},
};
use tracing::warn;
use url::Url;

fn handle_values(handle: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    values.insert("handle".to_string(), handle.to_string());
    values
}

/// Shared registry state plus the caller's own application data, passed to every dispatcher.
pub struct Context<T> {
    pub(crate) inner: Arc<FederationInner<T>>,
    pub(crate) data: T,
}

impl<T> Clone for Context<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            data: self.data.clone(),
        }
    }
}

impl<T> Deref for Context<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T: Clone + Send + Sync + 'static> Context<T> {
    pub(crate) fn new(inner: Arc<FederationInner<T>>, data: T) -> Self {
        let _ = inner.background_data.set(data.clone());
        Self { inner, data }
    }

    /// The application data this context was built with.
    pub fn data(&self) -> &T {
        &self.data
    }

    /// The registry's canonical origin, e.g. `https://example.com`.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    fn build_uri(&self, name: &str, values: &HashMap<String, String>) -> Result<Url, Error> {
        let path = self.inner.router.build_or_err(name, values)?;
        Ok(self.inner.base_url.join(&path)?)
    }

    /// URL of the `/.well-known/nodeinfo` discovery document.
    pub fn node_info_uri(&self) -> Result<Url, Error> {
        self.build_uri("nodeinfo-discovery", &HashMap::new())
    }

    /// URL of the actual NodeInfo document the discovery document points at.
    pub fn node_info_document_uri(&self) -> Result<Url, Error> {
        self.build_uri("nodeinfo", &HashMap::new())
    }

    /// URL of an actor's profile document.
    pub fn actor_uri(&self, handle: &str) -> Result<Url, Error> {
        self.build_uri("actor", &handle_values(handle))
    }

    /// URL of an object registered under `type_id`, built from its template `values`.
    pub fn object_uri(&self, type_id: &str, values: &HashMap<String, String>) -> Result<Url, Error> {
        self.build_uri(type_id, values)
    }

    /// URL of an actor's outbox collection.
    pub fn outbox_uri(&self, handle: &str) -> Result<Url, Error> {
        self.build_uri("outbox", &handle_values(handle))
    }

    /// URL of an actor's personal inbox.
    pub fn inbox_uri(&self, handle: &str) -> Result<Url, Error> {
        self.build_uri("inbox", &handle_values(handle))
    }

    /// URL of the server-wide shared inbox, if one is registered.
    pub fn shared_inbox_uri(&self) -> Result<Url, Error> {
        self.build_uri("shared-inbox", &HashMap::new())
    }

    /// URL of an actor's following collection.
    pub fn following_uri(&self, handle: &str) -> Result<Url, Error> {
        self.build_uri("following", &handle_values(handle))
    }

    /// URL of an actor's followers collection.
    pub fn followers_uri(&self, handle: &str) -> Result<Url, Error> {
        self.build_uri("followers", &handle_values(handle))
    }

    /// Recover the handle embedded in an actor URI, if it belongs to this registry's origin and
    /// actor route.
    pub fn handle_from_actor_uri(&self, url: &Url) -> Option<String> {
        if url.origin() != self.inner.base_url.origin() {
            return None;
        }
        let (name, values) = self.inner.router.route(url.path())?;
        if name != "actor" {
            return None;
        }
        values.get("handle").cloned()
    }

    /// The public key exposed for `handle`, as referenced from its actor document
    /// (`{actorUri}#main-key`). `None` if no key-pair dispatcher is registered or it has none.
    pub async fn actor_key(&self, handle: &str) -> Result<Option<CryptographicKey>, Error> {
        let Some(dispatcher) = self.inner.key_pair_dispatcher.clone() else {
            return Ok(None);
        };
        let Some(pair) = dispatcher(self.clone(), handle.to_string()).await? else {
            return Ok(None);
        };
        let owner = self.actor_uri(handle)?;
        let mut id = owner.clone();
        id.set_fragment(Some("main-key"));
        Ok(Some(CryptographicKey {
            id,
            owner,
            public_key_pem: pair.public_key_pem,
        }))
    }

    pub(crate) async fn actor_key_pair(&self, handle: &str) -> Result<Option<KeyPair>, Error> {
        let Some(dispatcher) = self.inner.key_pair_dispatcher.clone() else {
            return Ok(None);
        };
        dispatcher(self.clone(), handle.to_string()).await
    }

    /// The default, unauthenticated document loader shared by the whole registry.
    pub fn document_loader(&self) -> Arc<dyn DocumentLoader> {
        self.inner.document_loader.clone()
    }

    /// A document loader that signs its GET requests as `handle`, for dereferencing documents
    /// that require authorized fetch.
    pub async fn authenticated_document_loader(&self, handle: &str) -> Result<Arc<dyn DocumentLoader>, Error> {
        let Some(pair) = self.actor_key_pair(handle).await? else {
            return Ok(self.document_loader());
        };
        let mut key_id = self.actor_uri(handle)?;
        key_id.set_fragment(Some("main-key"));
        let inner = ReqwestDocumentLoader::authenticated(
            self.inner.http_client.clone(),
            self.inner.request_timeout,
            key_id.to_string(),
            pair.private_key_pem,
        );
        Ok(Arc::new(KvCachedDocumentLoader::new(
            inner,
            self.inner.kv.clone(),
            &self.inner.kv_prefixes,
        )))
    }

    /// Deliver `activity` from `sender`'s outbox to `recipients`, signing with `sender`'s key and
    /// either sending immediately or enqueuing per `options`.
    ///
    /// Starts the registry's queue consumer on the first call (spec §3: "the outbound queue
    /// listener starts lazily on the first sendActivity call").
    pub async fn send_activity(
        &self,
        sender: &str,
        recipients: Vec<Url>,
        activity: serde_json::Value,
        options: SendOptions,
    ) -> Result<(), Error> {
        crate::federation::ensure_outbox_consumer_started(&self.inner);
        send::send_activity(self, sender, recipients, activity, options).await
    }
}

/// A re-entrancy guard: a nested call to [`RequestContext::get_actor`] or
/// [`RequestContext::get_object`] for the same context logs a warning, then still delegates to
/// the dispatcher. Tracks nesting depth (not just a flag) so an inner call returning doesn't
/// erroneously clear the outer call's still-in-progress marker.
struct ReentryGuard(Mutex<u32>);

impl ReentryGuard {
    fn new() -> Self {
        Self(Mutex::new(0))
    }

    fn enter(&self) -> ReentryToken<'_> {
        let mut depth = self.0.lock().expect("reentry guard poisoned");
        if *depth > 0 {
            warn!("re-entrant dereference detected on the same request context; delegating anyway");
        }
        *depth += 1;
        ReentryToken(&self.0)
    }
}

struct ReentryToken<'a>(&'a Mutex<u32>);

impl Drop for ReentryToken<'_> {
    fn drop(&mut self) {
        *self.0.lock().expect("reentry guard poisoned") -= 1;
    }
}

/// A [`Context`] extended with the inbound request it was built for.
///
/// Handlers receive this; dispatchers receive a plain [`Context`] (see [`RequestContext::context`]).
pub struct RequestContext<T> {
    context: Context<T>,
    url: Url,
    headers: http::HeaderMap,
    reentry: Arc<ReentryGuard>,
    signed_key: Arc<Mutex<Option<Option<CryptographicKey>>>>,
    signed_key_owner: Arc<Mutex<Option<Option<Url>>>>,
    document_loader_override: Arc<Mutex<Option<Arc<dyn DocumentLoader>>>>,
}

impl<T> Clone for RequestContext<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            reentry: self.reentry.clone(),
            signed_key: self.signed_key.clone(),
            signed_key_owner: self.signed_key_owner.clone(),
            document_loader_override: self.document_loader_override.clone(),
        }
    }
}

impl<T> Deref for RequestContext<T> {
    type Target = Context<T>;

    fn deref(&self) -> &Context<T> {
        &self.context
    }
}

impl<T: Clone + Send + Sync + 'static> RequestContext<T> {
    pub(crate) fn new(context: Context<T>, url: Url, headers: http::HeaderMap) -> Self {
        Self {
            context,
            url,
            headers,
            reentry: Arc::new(ReentryGuard::new()),
            signed_key: Arc::new(Mutex::new(None)),
            signed_key_owner: Arc::new(Mutex::new(None)),
            document_loader_override: Arc::new(Mutex::new(None)),
        }
    }

    /// The full URL of the inbound request.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The document loader in effect for this request: `handle`'s authenticated loader if
    /// [`RequestContext::use_authenticated_document_loader`] has rewritten it (personal inbox
    /// deliveries), the registry's default loader otherwise. Shadows [`Context::document_loader`]
    /// so dereferences made while handling this request pick up the rewrite.
    pub fn document_loader(&self) -> Arc<dyn DocumentLoader> {
        if let Some(loader) = self.document_loader_override.lock().expect("memo poisoned").clone() {
            return loader;
        }
        self.context.document_loader()
    }

    /// Rewrite this request's document loader to `handle`'s authenticated loader. Called by
    /// [`crate::federation::Federation::fetch`] when the matched route is a personal inbox, so
    /// dereferences made while processing the delivery (e.g. fetching the sender's actor
    /// document) are signed as the receiving actor.
    pub(crate) async fn use_authenticated_document_loader(&self, handle: &str) -> Result<(), Error> {
        let loader = self.context.authenticated_document_loader(handle).await?;
        *self.document_loader_override.lock().expect("memo poisoned") = Some(loader);
        Ok(())
    }

    /// The inbound request's headers, for handlers that need to re-inspect signing material.
    pub fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    /// Demote to a plain [`Context`], the shape dispatchers actually receive.
    pub fn context(&self) -> Context<T> {
        self.context.clone()
    }

    /// Dereference the actor at `uri`: locally via the actor dispatcher if it belongs to this
    /// registry's origin, or (TODO: remote dereference is left to the caller's own document
    /// loader) `Ok(None)` otherwise.
    pub async fn get_actor(&self, handle: &str) -> Result<Option<serde_json::Value>, Error> {
        let _guard = self.reentry.enter();
        let Some((dispatcher, _authorize)) = self.inner.actor_dispatcher.clone() else {
            return Ok(None);
        };
        dispatcher(self.context(), handle_values(handle)).await
    }

    /// Dereference the object registered under `type_id` with the given template `values`.
    pub async fn get_object(
        &self,
        type_id: &str,
        values: HashMap<String, String>,
    ) -> Result<Option<serde_json::Value>, Error> {
        let _guard = self.reentry.enter();
        let Some((dispatcher, _authorize)) = self.inner.object_dispatchers.get(type_id).cloned() else {
            return Ok(None);
        };
        dispatcher(self.context(), values).await
    }

    /// The public key that signed this request's `Signature` header, resolved and memoized for
    /// the lifetime of this context so repeated calls return the identical value.
    pub async fn get_signed_key(&self) -> Option<CryptographicKey> {
        if let Some(key) = self.signed_key.lock().expect("memo poisoned").clone() {
            return key;
        }
        let owner = self.signing_key_owner_url();
        let key = match owner {
            Some(owner) => self.fetch_signing_key(&owner).await,
            None => None,
        };
        *self.signed_key.lock().expect("memo poisoned") = Some(key.clone());
        key
    }

    /// The actor URL that owns this request's signing key, memoized alongside
    /// [`RequestContext::get_signed_key`]. Derived from [`RequestContext::get_signed_key`]'s
    /// result rather than recomputed independently, so it can never disagree with the key it is
    /// the owner of.
    pub async fn get_signed_key_owner(&self) -> Option<Url> {
        if let Some(owner) = self.signed_key_owner.lock().expect("memo poisoned").clone() {
            return owner;
        }
        let owner = self.get_signed_key().await.map(|key| key.owner);
        *self.signed_key_owner.lock().expect("memo poisoned") = Some(owner.clone());
        owner
    }

    fn signing_key_owner_url(&self) -> Option<Url> {
        crate::signatures::signing_key_owner(&self.headers).ok()
    }

    async fn fetch_signing_key(&self, owner: &Url) -> Option<CryptographicKey> {
        let loader = self.document_loader();
        let document = loader.load_document(owner).await.ok()?;
        let public_key = document.document.get("publicKey")?;
        let id = public_key.get("id")?.as_str().and_then(|s| Url::parse(s).ok())?;
        let pem = public_key.get("publicKeyPem")?.as_str()?.to_string();
        Some(CryptographicKey {
            id,
            owner: owner.clone(),
            public_key_pem: pem,
        })
    }
}

