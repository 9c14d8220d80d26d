//! Per-surface HTTP handlers.
//!
//! Each submodule handles exactly one registered surface, taking the already-routed
//! [`crate::context::RequestContext`] plus the router's captured template values and returning a
//! framework-agnostic [`crate::HttpResponse`], applying the signed-request and
//! authorize-predicate checks this crate's handlers all need along the way.

pub mod actor;
pub mod collection;
pub mod inbox;
pub mod nodeinfo;
pub mod object;
pub mod webfinger;

use crate::{
    callback::SignedKeyInfo,
    context::RequestContext,
    FEDERATION_CONTENT_TYPE,
};

/// Check the request's `Accept` header for an ActivityStreams-compatible media type
/// (`application/activity+json`, `application/ld+json`, or a bare `*/*`/`application/*`
/// wildcard).
pub(crate) fn accepts_activitystreams(headers: &http::HeaderMap) -> bool {
    let Some(accept) = headers.get(http::header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        // No Accept header at all is treated as "anything goes", matching how most
        // ActivityPub implementations handle server-to-server GETs.
        return true;
    };
    accept.split(',').map(str::trim).any(|part| {
        let media = part.split(';').next().unwrap_or(part).trim();
        media == FEDERATION_CONTENT_TYPE
            || media == "application/ld+json"
            || media == "application/json"
            || media == "*/*"
            || media == "application/*"
    })
}

/// Resolve the signing key and its owner for a request's `Signature` header, if present, as the
/// [`SignedKeyInfo`] shape `authorize` predicates expect.
pub(crate) async fn signed_key_info<T: Clone + Send + Sync + 'static>(
    ctx: &RequestContext<T>,
) -> Option<SignedKeyInfo> {
    let key = ctx.get_signed_key().await?;
    let owner = ctx.get_signed_key_owner().await;
    Some(SignedKeyInfo { key, owner })
}
