//! The federation registry: one-shot dispatcher registration, request dispatch and outbound
//! delivery wiring.
//!
//! `FederationConfig`/`FederationConfigBuilder` are a `derive_builder`-generated builder over the
//! plain config fields, with a private `partial_build` and a public `build()` that hands the
//! assembled config to [`Federation::from_config`].
//! `Federation<T>` is the registration surface: a one-shot `set_*_dispatcher` setter API per
//! federation surface, with dispatch resolved against a runtime-registered activity-type map
//! rather than compile-time trait impls.

use crate::{
    callback::{
        AuthorizePredicate, CollectionCounter, CollectionCursor, CollectionDispatcher, DocumentDispatcher,
        InboxErrorHandler, InboxListener, KeyPairDispatcher, NodeInfoDispatcher, NotAcceptableHandler,
        NotFoundHandler, UnauthorizedHandler,
    },
    context::{Context, RequestContext},
    docloader::{DocumentLoader, KvCachedDocumentLoader, ReqwestDocumentLoader},
    error::{Error, RouterError},
    handlers,
    kv::{KvPrefixes, KvStore, MokaKvStore},
    queue::{MessageQueue, TokioDelayQueue},
    router::{Router, SurfaceShape},
    send::{self, OutboxMessage},
    HttpRequest, HttpResponse,
};
use derive_builder::Builder;
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tracing::error;

/// Static configuration for a [`Federation`] registry, built once at startup.
///
/// A `derive_builder`-generated builder for the plain config fields, with a custom `build()` that
/// hands the assembled config off to [`Federation::from_config`].
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(private, name = "partial_build"))]
pub struct FederationConfig {
    /// This server's canonical origin, e.g. `https://example.com`
    pub domain: url::Url,
    /// Key-value store backing idempotence markers and the document cache
    #[builder(setter(custom), default = "Arc::new(MokaKvStore::default())")]
    pub kv: Arc<dyn KvStore>,
    /// Key path prefixes under which idempotence markers and cached documents are stored
    #[builder(default = "KvPrefixes::default()")]
    pub kv_prefixes: KvPrefixes,
    /// Message queue backing outbound delivery retries
    #[builder(setter(custom), default = "Arc::new(TokioDelayQueue::default())")]
    pub queue: Arc<dyn MessageQueue>,
    /// Document loader used to dereference actors, objects and inbox signers, overriding the
    /// default KV-cached `reqwest`-based one
    #[builder(setter(custom), default = "None")]
    pub document_loader: Option<Arc<dyn DocumentLoader>>,
    /// HTTP client used for outbound signed requests and document fetches
    #[builder(default = "default_http_client()")]
    pub http_client: reqwest_middleware::ClientWithMiddleware,
    /// Timeout applied to every outbound request
    #[builder(default = "Duration::from_secs(10)")]
    pub request_timeout: Duration,
    /// Outbound delivery retry schedule; `backoff_schedule[i]` is the delay before the
    /// `(i+1)`-th retry. Defaults to the five documented tiers (3s, 15s, 1m, 15m, 1h).
    #[builder(default = "send::DEFAULT_BACKOFF_SCHEDULE.to_vec()")]
    pub backoff_schedule: Vec<Duration>,
    /// Treat an inbound request's `http://` URL as `https://` when building reverse URLs, for
    /// deployments behind a TLS-terminating proxy that forwards requests over plain HTTP
    #[builder(default = "false")]
    pub treat_https: bool,
}

fn default_http_client() -> reqwest_middleware::ClientWithMiddleware {
    reqwest_middleware::ClientWithMiddleware::from(reqwest::Client::new())
}

impl FederationConfigBuilder {
    /// Install a key-value store other than the default in-process [`MokaKvStore`].
    pub fn kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Install a message queue other than the default in-process [`TokioDelayQueue`].
    pub fn queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Install a document loader other than the default KV-cached `reqwest`-based one.
    pub fn document_loader(mut self, document_loader: Arc<dyn DocumentLoader>) -> Self {
        self.document_loader = Some(Some(document_loader));
        self
    }

    /// Finish building the config and start the registry.
    pub fn build<T: Clone + Send + Sync + 'static>(self) -> Result<Federation<T>, Error> {
        let config = self.partial_build().map_err(Error::other)?;
        Ok(Federation::from_config(config))
    }
}

pub(crate) struct CollectionRegistration<T> {
    pub(crate) dispatcher: CollectionDispatcher<T>,
    pub(crate) counter: Option<CollectionCounter<T>>,
    pub(crate) first_cursor: Option<CollectionCursor<T>>,
    pub(crate) last_cursor: Option<CollectionCursor<T>>,
    pub(crate) authorize: Option<AuthorizePredicate<T>>,
}

/// Shared state behind every [`Context`] clone. Built once by [`Federation`] and handed out
/// through `Arc` so dispatch and outbound delivery never need to lock it.
pub(crate) struct FederationInner<T> {
    pub(crate) router: Router,
    pub(crate) base_url: url::Url,
    pub(crate) kv: Arc<dyn KvStore>,
    pub(crate) kv_prefixes: KvPrefixes,
    pub(crate) queue: Arc<dyn MessageQueue>,
    pub(crate) http_client: reqwest_middleware::ClientWithMiddleware,
    pub(crate) request_timeout: Duration,
    pub(crate) document_loader: Arc<dyn DocumentLoader>,
    pub(crate) backoff_schedule: Vec<Duration>,
    pub(crate) treat_https: bool,
    pub(crate) node_info_dispatcher: Option<NodeInfoDispatcher<T>>,
    pub(crate) actor_dispatcher: Option<(DocumentDispatcher<T>, Option<AuthorizePredicate<T>>)>,
    pub(crate) object_dispatchers: HashMap<&'static str, (DocumentDispatcher<T>, Option<AuthorizePredicate<T>>)>,
    pub(crate) key_pair_dispatcher: Option<KeyPairDispatcher<T>>,
    pub(crate) outbox: Option<CollectionRegistration<T>>,
    pub(crate) following: Option<CollectionRegistration<T>>,
    pub(crate) followers: Option<CollectionRegistration<T>>,
    pub(crate) inbox_listeners: HashMap<&'static str, InboxListener<T>>,
    pub(crate) inbox_error_handler: Option<InboxErrorHandler<T>>,
    pub(crate) outbox_error_handler: Option<InboxErrorHandler<T>>,
    pub(crate) has_shared_inbox: bool,
    /// A snapshot of application data captured from the first [`Context`] ever built, reused to
    /// build contexts for background outbox delivery, which has no request of its own to derive
    /// data from.
    pub(crate) background_data: OnceLock<T>,
    /// Test-and-set flag for [`ensure_outbox_consumer_started`], so the queue listener is spawned
    /// exactly once, on the first `sendActivity` call, rather than during dispatcher registration.
    pub(crate) queue_consumer_started: OnceLock<()>,
}

/// The federation registry: holds every registered dispatcher and the shared collaborators
/// (router, KV store, queue, HTTP client) that back them.
pub struct Federation<T> {
    inner: Arc<FederationInner<T>>,
}

impl<T> Clone for Federation<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + Sync + 'static> Federation<T> {
    fn from_config(config: FederationConfig) -> Self {
        let mut router = Router::new();
        router
            .add("/.well-known/nodeinfo", "nodeinfo-discovery")
            .expect("built-in route template is valid");
        router
            .add("/.well-known/webfinger", "webfinger")
            .expect("built-in route template is valid");

        let kv_prefixes = config.kv_prefixes;
        let document_loader = config.document_loader.unwrap_or_else(|| {
            Arc::new(KvCachedDocumentLoader::new(
                ReqwestDocumentLoader::new(config.http_client.clone(), config.request_timeout),
                config.kv.clone(),
                &kv_prefixes,
            ))
        });

        Self {
            inner: Arc::new(FederationInner {
                router,
                base_url: config.domain,
                kv: config.kv,
                kv_prefixes,
                queue: config.queue,
                http_client: config.http_client,
                request_timeout: config.request_timeout,
                document_loader,
                backoff_schedule: config.backoff_schedule,
                treat_https: config.treat_https,
                node_info_dispatcher: None,
                actor_dispatcher: None,
                object_dispatchers: HashMap::new(),
                key_pair_dispatcher: None,
                outbox: None,
                following: None,
                followers: None,
                inbox_listeners: HashMap::new(),
                inbox_error_handler: None,
                outbox_error_handler: None,
                has_shared_inbox: false,
                background_data: OnceLock::new(),
                queue_consumer_started: OnceLock::new(),
            }),
        }
    }

    fn inner_mut(&mut self) -> &mut FederationInner<T> {
        Arc::get_mut(&mut self.inner)
            .expect("Federation dispatchers must be registered before any Context is handed out")
    }

    /// Register the document dispatcher for the NodeInfo document, served at
    /// `/.well-known/nodeinfo`'s target.
    pub fn set_node_info_dispatcher(&mut self, path: &str, dispatcher: NodeInfoDispatcher<T>) -> Result<&mut Self, Error> {
        let vars = self.inner_mut().router.add(path, "nodeinfo")?;
        SurfaceShape::Zero.check("nodeinfo", &vars)?;
        self.inner_mut().node_info_dispatcher = Some(dispatcher);
        Ok(self)
    }

    /// Register the actor dispatcher at `path` (must contain exactly `{handle}`).
    pub fn set_actor_dispatcher(
        &mut self,
        path: &str,
        dispatcher: DocumentDispatcher<T>,
        authorize: Option<AuthorizePredicate<T>>,
    ) -> Result<&mut Self, Error> {
        let vars = self.inner_mut().router.add(path, "actor")?;
        SurfaceShape::Handle.check("actor", &vars)?;
        self.inner_mut().actor_dispatcher = Some((dispatcher, authorize));
        Ok(self)
    }

    /// Register the key-pair dispatcher used to sign outgoing activities and expose actors'
    /// public keys.
    pub fn set_key_pair_dispatcher(&mut self, dispatcher: KeyPairDispatcher<T>) -> &mut Self {
        self.inner_mut().key_pair_dispatcher = Some(dispatcher);
        self
    }

    /// Register an object dispatcher under `type_id` at `path` (must contain at least one
    /// template variable).
    pub fn set_object_dispatcher(
        &mut self,
        type_id: &'static str,
        path: &str,
        dispatcher: DocumentDispatcher<T>,
        authorize: Option<AuthorizePredicate<T>>,
    ) -> Result<&mut Self, Error> {
        let vars = self.inner_mut().router.add(path, type_id)?;
        SurfaceShape::NonEmpty.check(type_id, &vars)?;
        self.inner_mut().object_dispatchers.insert(type_id, (dispatcher, authorize));
        Ok(self)
    }

    /// Register the outbox collection dispatcher at `path` (must contain exactly `{handle}`).
    #[allow(clippy::too_many_arguments)]
    pub fn set_outbox_dispatcher(
        &mut self,
        path: &str,
        dispatcher: CollectionDispatcher<T>,
        counter: Option<CollectionCounter<T>>,
        first_cursor: Option<CollectionCursor<T>>,
        last_cursor: Option<CollectionCursor<T>>,
        authorize: Option<AuthorizePredicate<T>>,
    ) -> Result<&mut Self, Error> {
        let vars = self.inner_mut().router.add(path, "outbox")?;
        SurfaceShape::Handle.check("outbox", &vars)?;
        self.inner_mut().outbox = Some(CollectionRegistration { dispatcher, counter, first_cursor, last_cursor, authorize });
        Ok(self)
    }

    /// Register the following collection dispatcher at `path` (must contain exactly `{handle}`).
    #[allow(clippy::too_many_arguments)]
    pub fn set_following_dispatcher(
        &mut self,
        path: &str,
        dispatcher: CollectionDispatcher<T>,
        counter: Option<CollectionCounter<T>>,
        first_cursor: Option<CollectionCursor<T>>,
        last_cursor: Option<CollectionCursor<T>>,
        authorize: Option<AuthorizePredicate<T>>,
    ) -> Result<&mut Self, Error> {
        let vars = self.inner_mut().router.add(path, "following")?;
        SurfaceShape::Handle.check("following", &vars)?;
        self.inner_mut().following = Some(CollectionRegistration { dispatcher, counter, first_cursor, last_cursor, authorize });
        Ok(self)
    }

    /// Register the followers collection dispatcher at `path` (must contain exactly `{handle}`).
    #[allow(clippy::too_many_arguments)]
    pub fn set_followers_dispatcher(
        &mut self,
        path: &str,
        dispatcher: CollectionDispatcher<T>,
        counter: Option<CollectionCounter<T>>,
        first_cursor: Option<CollectionCursor<T>>,
        last_cursor: Option<CollectionCursor<T>>,
        authorize: Option<AuthorizePredicate<T>>,
    ) -> Result<&mut Self, Error> {
        let vars = self.inner_mut().router.add(path, "followers")?;
        SurfaceShape::Handle.check("followers", &vars)?;
        self.inner_mut().followers = Some(CollectionRegistration { dispatcher, counter, first_cursor, last_cursor, authorize });
        Ok(self)
    }

    /// Register personal and (optionally) shared inbox routes. Must be called exactly once;
    /// call [`Federation::on_inbox`] afterward per activity type. The queue's outbox consumer is
    /// not started here — it starts lazily on the first `sendActivity` call (spec §3 lifecycles),
    /// so registration never holds a second strong reference to the shared state.
    pub fn set_inbox_listeners(&mut self, personal_path: &str, shared_path: Option<&str>) -> Result<&mut Self, Error> {
        let vars = self.inner_mut().router.add(personal_path, "inbox")?;
        SurfaceShape::Handle.check("inbox", &vars)?;
        if let Some(shared_path) = shared_path {
            let vars = self.inner_mut().router.add(shared_path, "shared-inbox")?;
            SurfaceShape::Zero.check("shared-inbox", &vars)?;
            self.inner_mut().has_shared_inbox = true;
        }
        Ok(self)
    }

    /// Register a listener invoked when an inbox receives an activity whose class chain
    /// includes `activity_type` (most specific match wins). Refuses a second registration for
    /// the same class.
    pub fn on_inbox(&mut self, activity_type: &'static str, listener: InboxListener<T>) -> Result<&mut Self, Error> {
        let inner = self.inner_mut();
        if inner.inbox_listeners.contains_key(activity_type) {
            return Err(Error::DuplicateInboxListener(activity_type.to_string()));
        }
        inner.inbox_listeners.insert(activity_type, listener);
        Ok(self)
    }

    /// Register the handler invoked when an inbox listener returns an error.
    pub fn set_inbox_error_handler(&mut self, handler: InboxErrorHandler<T>) -> &mut Self {
        self.inner_mut().inbox_error_handler = Some(handler);
        self
    }

    /// Register the handler invoked on every failed outbound delivery attempt, not only once
    /// the retry schedule is exhausted, so callers can track per-attempt failures as they happen.
    pub fn set_outbox_error_handler(&mut self, handler: InboxErrorHandler<T>) -> &mut Self {
        self.inner_mut().outbox_error_handler = Some(handler);
        self
    }

    /// This registry's canonical origin, e.g. `https://example.com`. Framework adapters use this
    /// to reconstruct a full URL from a request that only carries a path and query.
    pub fn base_url(&self) -> &url::Url {
        &self.inner.base_url
    }

    /// Build a [`Context`] carrying `data`, without an associated inbound request. Used by
    /// background jobs that need to call `send_activity` or dereference actors outside of an
    /// HTTP request.
    pub fn context(&self, data: T) -> Context<T> {
        Context::new(self.inner.clone(), data)
    }

    /// Dispatch an inbound HTTP request to the matching registered surface, using the default
    /// 404/406/401 responses. See [`Federation::fetch_with`] to override them.
    pub async fn fetch(&self, request: HttpRequest, data: T) -> HttpResponse {
        self.fetch_with(request, data, FetchOptions::default()).await
    }

    /// Dispatch an inbound HTTP request to the matching registered surface, overriding the
    /// default not-found/not-acceptable/unauthorized responses per `options`.
    pub async fn fetch_with(&self, request: HttpRequest, data: T, options: FetchOptions) -> HttpResponse {
        let context = Context::new(self.inner.clone(), data);

        // §4.F: behind a TLS-terminating proxy the request reaches us over plain HTTP, but
        // reverse-built URLs must still advertise the registry's real `https://` origin.
        let mut request_url = request.url.clone();
        if self.inner.treat_https && request_url.scheme() == "http" {
            let _ = request_url.set_scheme("https");
        }
        let request_context = RequestContext::new(context, request_url, request.headers.clone());

        let Some((name, values)) = self.inner.router.route(request.url.path()) else {
            return match &options.on_not_found {
                Some(handler) => handler(),
                None => HttpResponse::status(http::StatusCode::NOT_FOUND),
            };
        };

        let result = match name.as_str() {
            "nodeinfo-discovery" => handlers::nodeinfo::discovery(&request_context).await,
            "nodeinfo" => handlers::nodeinfo::document(&request_context).await,
            "webfinger" => handlers::webfinger::handle(&request_context).await,
            "actor" => handlers::actor::handle(&request_context, &values).await,
            "outbox" => handlers::collection::handle(&request_context, &values, CollectionKind::Outbox).await,
            "following" => handlers::collection::handle(&request_context, &values, CollectionKind::Following).await,
            "followers" => handlers::collection::handle(&request_context, &values, CollectionKind::Followers).await,
            "inbox" => route_inbox(&request_context, &request, values.get("handle").cloned()).await,
            "shared-inbox" => handlers::inbox::handle(&request_context, &request, None).await,
            object_type => handlers::object::handle(&request_context, object_type, &values).await,
        };

        match result {
            Ok(response) => response,
            Err(Error::NotFound) | Err(Error::Router(RouterError::NotRegistered(_))) => match &options.on_not_found {
                Some(handler) => handler(),
                None => HttpResponse::status(http::StatusCode::NOT_FOUND),
            },
            Err(Error::Unauthorized) | Err(Error::SignatureInvalid) => match &options.on_unauthorized {
                Some(handler) => handler(),
                None => HttpResponse::status_with_vary(http::StatusCode::UNAUTHORIZED),
            },
            Err(Error::NotAcceptable) => match &options.on_not_acceptable {
                Some(handler) => handler(),
                None => HttpResponse::status_with_vary(http::StatusCode::NOT_ACCEPTABLE),
            },
            Err(Error::MethodNotAllowed) => HttpResponse::status(http::StatusCode::METHOD_NOT_ALLOWED),
            Err(Error::BadRequest(_)) => HttpResponse::status(http::StatusCode::BAD_REQUEST),
            Err(err) => {
                error!("unhandled error dispatching {}: {err}", request.url.path());
                HttpResponse::status(http::StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// Start the queue's outbound-delivery consumer the first time it's needed (spec §3 lifecycles:
/// "the outbound queue listener starts lazily on the first sendActivity call"). Guarded by a
/// one-shot `OnceLock` test-and-set rather than run from dispatcher registration, so registering
/// inbox listeners never has to hold a second strong `Arc` over `FederationInner` — which would
/// make `Federation::inner_mut`'s `Arc::get_mut` fail on every subsequent registration call.
pub(crate) fn ensure_outbox_consumer_started<T: Clone + Send + Sync + 'static>(inner: &Arc<FederationInner<T>>) {
    if inner.queue_consumer_started.set(()).is_err() {
        return;
    }
    let listener_inner = inner.clone();
    let listener: crate::queue::Listener = Arc::new(move |bytes| {
        let inner = listener_inner.clone();
        Box::pin(async move {
            let Some(message) = crate::queue::decode_or_warn::<OutboxMessage>(&bytes) else {
                return;
            };
            let Some(data) = inner.background_data.get().cloned() else {
                tracing::warn!("dropping outbox message enqueued before any Context existed");
                return;
            };
            let ctx = Context::new(inner, data);
            send::process_outbox_message(&ctx, message).await;
        })
    });
    let queue = inner.queue.clone();
    tokio::spawn(async move { queue.listen(listener).await });
}

/// The `inbox` route rewrites the context's document loader to the receiving actor's
/// authenticated loader before dispatching; `shared-inbox` has no single owning actor to
/// authenticate as, so it dispatches unchanged.
async fn route_inbox<T: Clone + Send + Sync + 'static>(
    ctx: &RequestContext<T>,
    request: &HttpRequest,
    handle: Option<String>,
) -> Result<HttpResponse, Error> {
    if let Some(handle) = &handle {
        ctx.use_authenticated_document_loader(handle).await?;
    }
    handlers::inbox::handle(ctx, request, handle).await
}

/// Per-call overrides for [`Federation::fetch`]'s default 404/406/401 responses.
///
/// Left at its `Default`, `fetch` produces plain-text 404/406/401 responses, with
/// `Vary: Accept, Signature` on the latter two.
#[derive(Default, Clone)]
pub struct FetchOptions {
    /// Overrides the response for routes that don't match any registered surface.
    pub on_not_found: Option<NotFoundHandler>,
    /// Overrides the response when a request's `Accept` header isn't ActivityStreams-compatible.
    pub on_not_acceptable: Option<NotAcceptableHandler>,
    /// Overrides the response when a request fails authorization or signature verification.
    pub on_unauthorized: Option<UnauthorizedHandler>,
}

/// What kind of actor collection a "collection" route resolves to, so one handler can serve all
/// three: outbox, following and followers share a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CollectionKind {
    Outbox,
    Following,
    Followers,
}

impl CollectionKind {
    pub(crate) fn route_name(self) -> &'static str {
        match self {
            CollectionKind::Outbox => "outbox",
            CollectionKind::Following => "following",
            CollectionKind::Followers => "followers",
        }
    }
}

