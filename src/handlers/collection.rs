//! Outbox/following/followers collection handler.
//!
//! All three surfaces share one shape: an `OrderedCollection` index (total count, `first` link)
//! and cursor-paginated `OrderedCollectionPage`s. One handler serves all three, parameterized by
//! [`CollectionKind`].

use super::accepts_activitystreams;
use crate::{
    callback::AuthorizeSubject,
    context::RequestContext,
    error::{Error, RouterError},
    federation::{CollectionKind, CollectionRegistration},
    HttpResponse, FEDERATION_CONTENT_TYPE,
};
use std::collections::HashMap;

/// Serve the outbox, following or followers collection for the handle captured by the route,
/// paginating via a `cursor` query parameter.
pub async fn handle<T: Clone + Send + Sync + 'static>(
    ctx: &RequestContext<T>,
    values: &HashMap<String, String>,
    kind: CollectionKind,
) -> Result<HttpResponse, Error> {
    if !accepts_activitystreams(ctx.headers()) {
        return Err(Error::NotAcceptable);
    }
    let handle = values.get("handle").ok_or(Error::NotFound)?;

    let registration = match kind {
        CollectionKind::Outbox => ctx.inner.outbox.as_ref(),
        CollectionKind::Following => ctx.inner.following.as_ref(),
        CollectionKind::Followers => ctx.inner.followers.as_ref(),
    }
    .ok_or(RouterError::NotRegistered(kind.route_name()))?;

    let collection_uri = match kind {
        CollectionKind::Outbox => ctx.outbox_uri(handle)?,
        CollectionKind::Following => ctx.following_uri(handle)?,
        CollectionKind::Followers => ctx.followers_uri(handle)?,
    };

    if let Some(authorize) = registration.authorize.clone() {
        let signed = super::signed_key_info(ctx).await;
        let allowed = authorize(ctx.context(), AuthorizeSubject::Handle(handle.clone()), signed).await?;
        if !allowed {
            return Err(Error::Unauthorized);
        }
    }

    let cursor = ctx
        .url()
        .query_pairs()
        .find(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned());

    match cursor {
        Some(cursor) => page(ctx, &registration.dispatcher, handle, &collection_uri, cursor).await,
        None => index(ctx, registration, handle, &collection_uri).await,
    }
}

async fn page<T: Clone + Send + Sync + 'static>(
    ctx: &RequestContext<T>,
    dispatcher: &crate::callback::CollectionDispatcher<T>,
    handle: &str,
    collection_uri: &url::Url,
    cursor: String,
) -> Result<HttpResponse, Error> {
    let Some(page) = dispatcher(ctx.context(), handle.to_string(), Some(cursor.clone())).await? else {
        return Err(Error::NotFound);
    };

    let mut self_uri = collection_uri.clone();
    self_uri.query_pairs_mut().append_pair("cursor", &cursor);

    let mut document = serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": self_uri,
        "type": "OrderedCollectionPage",
        "partOf": collection_uri,
        "orderedItems": page.items,
    });
    if let Some(next) = page.next_cursor {
        let mut next_uri = collection_uri.clone();
        next_uri.query_pairs_mut().append_pair("cursor", &next);
        document["next"] = serde_json::Value::String(next_uri.to_string());
    }
    HttpResponse::json(http::StatusCode::OK, FEDERATION_CONTENT_TYPE, &document)
}

async fn index<T: Clone + Send + Sync + 'static>(
    ctx: &RequestContext<T>,
    registration: &CollectionRegistration<T>,
    handle: &str,
    collection_uri: &url::Url,
) -> Result<HttpResponse, Error> {
    let total_items = match &registration.counter {
        Some(counter) => counter(ctx.context(), handle.to_string()).await?,
        None => None,
    };
    let first_cursor = match &registration.first_cursor {
        Some(first_cursor) => first_cursor(ctx.context(), handle.to_string()).await?,
        None => None,
    };
    let last_cursor = match &registration.last_cursor {
        Some(last_cursor) => last_cursor(ctx.context(), handle.to_string()).await?,
        None => None,
    };

    let mut document = serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": collection_uri,
        "type": "OrderedCollection",
    });
    if let Some(total) = total_items {
        document["totalItems"] = serde_json::json!(total);
    }
    if let Some(first_cursor) = first_cursor {
        let mut first_uri = collection_uri.clone();
        first_uri.query_pairs_mut().append_pair("cursor", &first_cursor);
        document["first"] = serde_json::Value::String(first_uri.to_string());
    }
    if let Some(last_cursor) = last_cursor {
        let mut last_uri = collection_uri.clone();
        last_uri.query_pairs_mut().append_pair("cursor", &last_cursor);
        document["last"] = serde_json::Value::String(last_uri.to_string());
    }
    HttpResponse::json(http::StatusCode::OK, FEDERATION_CONTENT_TYPE, &document)
}
