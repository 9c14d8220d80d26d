//! Actor profile document handler.

use super::accepts_activitystreams;
use crate::{
    callback::AuthorizeSubject,
    context::RequestContext,
    error::{Error, RouterError},
    HttpResponse, FEDERATION_CONTENT_TYPE,
};
use std::collections::HashMap;

/// Serve the actor document for the handle captured by the route, enforcing content negotiation
/// and the registered `authorize` predicate, if any.
pub async fn handle<T: Clone + Send + Sync + 'static>(
    ctx: &RequestContext<T>,
    values: &HashMap<String, String>,
) -> Result<HttpResponse, Error> {
    if !accepts_activitystreams(ctx.headers()) {
        return Err(Error::NotAcceptable);
    }
    let handle = values.get("handle").ok_or(Error::NotFound)?;
    let Some((dispatcher, authorize)) = ctx.inner.actor_dispatcher.clone() else {
        return Err(RouterError::NotRegistered("actor").into());
    };

    if let Some(authorize) = authorize {
        let signed = super::signed_key_info(ctx).await;
        let allowed = authorize(ctx.context(), AuthorizeSubject::Handle(handle.clone()), signed).await?;
        if !allowed {
            return Err(Error::Unauthorized);
        }
    }

    match dispatcher(ctx.context(), values.clone()).await? {
        Some(document) => HttpResponse::json(http::StatusCode::OK, FEDERATION_CONTENT_TYPE, &document),
        None => Err(Error::NotFound),
    }
}
