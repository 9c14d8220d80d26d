//! NodeInfo discovery and document handler.

use crate::{context::RequestContext, error::Error, nodeinfo, HttpResponse, FEDERATION_CONTENT_TYPE};

/// Serve `/.well-known/nodeinfo`: a JRD pointing at the actual NodeInfo document.
pub async fn discovery<T: Clone + Send + Sync + 'static>(ctx: &RequestContext<T>) -> Result<HttpResponse, Error> {
    let document = nodeinfo::build_discovery(ctx.node_info_document_uri()?);
    HttpResponse::json(http::StatusCode::OK, "application/jrd+json", &document)
}

/// Serve the NodeInfo document itself, via the registered dispatcher.
pub async fn document<T: Clone + Send + Sync + 'static>(ctx: &RequestContext<T>) -> Result<HttpResponse, Error> {
    let Some(dispatcher) = ctx.inner.node_info_dispatcher.clone() else {
        return Err(Error::NotFound);
    };
    let document = dispatcher(ctx.context()).await?;
    HttpResponse::json(http::StatusCode::OK, FEDERATION_CONTENT_TYPE, &document)
}
