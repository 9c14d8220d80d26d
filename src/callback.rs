//! Callback contracts: the shapes of user-supplied dispatchers, authorize predicates and
//! listeners.
//!
//! Every dispatcher is type-erased to `Arc<dyn Fn(...) -> BoxFuture<...> + Send + Sync>` at
//! registration time (see `Federation::set_actor_dispatcher` and friends in `federation.rs`): the
//! caller's strongly-typed `async fn`/closure is wrapped once, its output serialized to
//! `serde_json::Value` immediately, so the registry itself stays non-generic over each surface's
//! document type. Dispatchers returning `Ok(None)` mean "not found" (404); an `Err` bubbles as a
//! 500 unless it is a router error.

use crate::{activity::Activity, context::Context, error::Error};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

/// A boxed, `Send` future, the common currency for type-erased async callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An actor's public key, as exposed to remote peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptographicKey {
    /// The key's id, conventionally `{actorUri}#main-key`
    pub id: url::Url,
    /// The actor this key belongs to
    pub owner: url::Url,
    /// PEM-encoded public key
    pub public_key_pem: String,
}

/// An actor's full keypair, used for signing outgoing requests and inbox GETs.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// PEM-encoded public key
    pub public_key_pem: String,
    /// PEM-encoded private key
    pub private_key_pem: String,
}

/// The subject passed to an `authorize` predicate: either a bare actor handle, or the full set
/// of template values for a parameterized object route.
#[derive(Debug, Clone)]
pub enum AuthorizeSubject {
    /// Actor / collection routes: just the handle
    Handle(String),
    /// Object routes: every captured template variable
    Values(HashMap<String, String>),
}

/// Information about the request's HTTP-signature signer, passed to authorize predicates.
#[derive(Debug, Clone)]
pub struct SignedKeyInfo {
    /// The key that signed the request
    pub key: CryptographicKey,
    /// The actor URL that owns the signing key, if it could be resolved
    pub owner: Option<url::Url>,
}

/// Dispatcher returning a JSON-LD document (actor, object or NodeInfo), already erased to
/// `serde_json::Value`. `Ok(None)` means not found.
pub type DocumentDispatcher<T> = Arc<
    dyn Fn(Context<T>, HashMap<String, String>) -> BoxFuture<'static, Result<Option<serde_json::Value>, Error>>
        + Send
        + Sync,
>;

/// Dispatcher resolving an actor's keypair, given their handle. `Ok(None)` if the actor is
/// unknown or has no key.
pub type KeyPairDispatcher<T> = Arc<
    dyn Fn(Context<T>, String) -> BoxFuture<'static, Result<Option<KeyPair>, Error>> + Send + Sync,
>;

/// `authorize` predicate: `false` (or `Ok(false)`) denies with 401.
pub type AuthorizePredicate<T> = Arc<
    dyn Fn(Context<T>, AuthorizeSubject, Option<SignedKeyInfo>) -> BoxFuture<'static, Result<bool, Error>>
        + Send
        + Sync,
>;

/// A single page of a collection, as returned by a collection dispatcher.
#[derive(Debug, Clone)]
pub struct CollectionPage {
    /// Items on this page, already erased to JSON-LD values
    pub items: Vec<serde_json::Value>,
    /// Cursor for the next page, if any
    pub next_cursor: Option<String>,
}

/// Dispatcher for a collection (outbox, following, followers) page.
pub type CollectionDispatcher<T> = Arc<
    dyn Fn(Context<T>, String, Option<String>) -> BoxFuture<'static, Result<Option<CollectionPage>, Error>>
        + Send
        + Sync,
>;

/// Returns the total item count for a collection's index document.
pub type CollectionCounter<T> =
    Arc<dyn Fn(Context<T>, String) -> BoxFuture<'static, Result<Option<u64>, Error>> + Send + Sync>;

/// Returns the cursor for a collection's `first`/`last` link.
pub type CollectionCursor<T> =
    Arc<dyn Fn(Context<T>, String) -> BoxFuture<'static, Result<Option<String>, Error>> + Send + Sync>;

/// Inbox listener invoked once a registered activity class is received.
pub type InboxListener<T> =
    Arc<dyn Fn(Context<T>, Activity) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Error handler invoked when an inbox listener throws. Its own failures are swallowed and
/// logged.
pub type InboxErrorHandler<T> =
    Arc<dyn Fn(Context<T>, Error, Option<Activity>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Dispatcher returning the NodeInfo document.
pub type NodeInfoDispatcher<T> =
    Arc<dyn Fn(Context<T>) -> BoxFuture<'static, Result<crate::nodeinfo::NodeInfo, Error>> + Send + Sync>;

/// Handler invoked by [`crate::federation::Federation::fetch`] for routes it could not dispatch.
pub type NotFoundHandler = Arc<dyn Fn() -> crate::HttpResponse + Send + Sync>;

/// Handler invoked on content-negotiation failure.
pub type NotAcceptableHandler = Arc<dyn Fn() -> crate::HttpResponse + Send + Sync>;

/// Handler invoked when a request fails authorization or signature verification.
pub type UnauthorizedHandler = Arc<dyn Fn() -> crate::HttpResponse + Send + Sync>;

/// Wrap a strongly-typed, serializable dispatcher into the erased [`DocumentDispatcher`] shape.
pub fn erase_document_dispatcher<T, A, F, Fut>(f: F) -> DocumentDispatcher<T>
where
    T: Clone + Send + Sync + 'static,
    A: serde::Serialize + Send + 'static,
    F: Fn(Context<T>, HashMap<String, String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<A>, Error>> + Send + 'static,
{
    Arc::new(move |ctx, values| {
        let fut = f(ctx, values);
        Box::pin(async move {
            match fut.await? {
                Some(value) => Ok(Some(serde_json::to_value(value)?)),
                None => Ok(None),
            }
        })
    })
}

/// Wrap a strongly-typed collection dispatcher into the erased [`CollectionDispatcher`] shape.
pub fn erase_collection_dispatcher<T, A, F, Fut>(f: F) -> CollectionDispatcher<T>
where
    T: Clone + Send + Sync + 'static,
    A: serde::Serialize + Send + 'static,
    F: Fn(Context<T>, String, Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<(Vec<A>, Option<String>)>, Error>> + Send + 'static,
{
    Arc::new(move |ctx, handle, cursor| {
        let fut = f(ctx, handle, cursor);
        Box::pin(async move {
            match fut.await? {
                Some((items, next_cursor)) => {
                    let items = items
                        .into_iter()
                        .map(|i| serde_json::to_value(i).map_err(Error::from))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Some(CollectionPage { items, next_cursor }))
                }
                None => Ok(None),
            }
        })
    })
}
