//! Typed-object document handler.
//!
//! One handler serves every object dispatcher registered via
//! [`crate::federation::Federation::set_object_dispatcher`]; `type_id` is the router route name
//! the request matched, which doubles as the dispatcher registry key.

use super::accepts_activitystreams;
use crate::{
    callback::AuthorizeSubject,
    context::RequestContext,
    error::{Error, RouterError},
    HttpResponse, FEDERATION_CONTENT_TYPE,
};
use std::collections::HashMap;

/// Serve the object document registered under `type_id` for the captured template `values`.
pub async fn handle<T: Clone + Send + Sync + 'static>(
    ctx: &RequestContext<T>,
    type_id: &str,
    values: &HashMap<String, String>,
) -> Result<HttpResponse, Error> {
    if !accepts_activitystreams(ctx.headers()) {
        return Err(Error::NotAcceptable);
    }
    let Some((dispatcher, authorize)) = ctx.inner.object_dispatchers.get(type_id).cloned() else {
        return Err(RouterError::NotRegistered("object").into());
    };

    if let Some(authorize) = authorize {
        let signed = super::signed_key_info(ctx).await;
        let allowed = authorize(ctx.context(), AuthorizeSubject::Values(values.clone()), signed).await?;
        if !allowed {
            return Err(Error::Unauthorized);
        }
    }

    match dispatcher(ctx.context(), values.clone()).await? {
        Some(document) => HttpResponse::json(http::StatusCode::OK, FEDERATION_CONTENT_TYPE, &document),
        None => Err(Error::NotFound),
    }
}
