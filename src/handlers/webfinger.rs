//! WebFinger handler: resolve a `resource` query parameter to an actor, if one exists.

use crate::{
    context::RequestContext,
    error::Error,
    webfinger::{build_webfinger_response, parse_resource, WebfingerResource},
    HttpResponse,
};

/// Serve `/.well-known/webfinger?resource=...`.
pub async fn handle<T: Clone + Send + Sync + 'static>(ctx: &RequestContext<T>) -> Result<HttpResponse, Error> {
    let Some(resource) = ctx
        .url()
        .query_pairs()
        .find(|(key, _)| key == "resource")
        .map(|(_, value)| value.into_owned())
    else {
        return Err(Error::BadRequest("missing `resource` query parameter".to_string()));
    };

    let handle = match parse_resource(&resource) {
        Some(WebfingerResource::Acct { handle, .. }) => handle,
        Some(WebfingerResource::ActorUri(url)) => match ctx.handle_from_actor_uri(&url) {
            Some(handle) => handle,
            None => return Err(Error::NotFound),
        },
        None => return Err(Error::BadRequest(format!("malformed `resource` parameter `{resource}`"))),
    };

    let Some((dispatcher, _authorize)) = ctx.inner.actor_dispatcher.clone() else {
        return Err(Error::NotFound);
    };
    let mut values = std::collections::HashMap::new();
    values.insert("handle".to_string(), handle.clone());
    if dispatcher(ctx.context(), values).await?.is_none() {
        return Err(Error::NotFound);
    }

    let actor_uri = ctx.actor_uri(&handle)?;
    let jrd = build_webfinger_response(resource, actor_uri, None);
    HttpResponse::json(http::StatusCode::OK, "application/jrd+json", &jrd)
}
