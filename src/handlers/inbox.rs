//! Inbox delivery handler: signature verification, idempotence, and most-specific-first listener
//! dispatch.
//!
//! Verify the body digest, parse the activity, verify the HTTP signature, then walk the
//! most-specific-first class chain of registered activity-type listeners. Delivery is claimed
//! exactly once via an idempotence key in the KV store, so redelivery after a process restart or
//! a queued retry on the sender's side doesn't re-run listeners.

use crate::{
    activity::Activity,
    context::RequestContext,
    error::Error,
    kv::{KvStore, SetOptions},
    signatures,
    HttpRequest, HttpResponse,
};
use std::time::Duration;
use tracing::warn;

/// How long an inbox idempotence claim survives. Long enough to outlast any plausible sender
/// retry window without growing the KV store unbounded.
const IDEMPOTENCE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Receive an activity POSTed to a personal inbox (`handle = Some(_)`) or the shared inbox
/// (`handle = None`).
pub async fn handle<T: Clone + Send + Sync + 'static>(
    ctx: &RequestContext<T>,
    request: &HttpRequest,
    handle: Option<String>,
) -> Result<HttpResponse, Error> {
    if request.method != http::Method::POST {
        return Err(Error::MethodNotAllowed);
    }

    let content_type = request
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .unwrap_or_default();
    if content_type != crate::FEDERATION_CONTENT_TYPE && content_type != "application/ld+json" {
        return Err(Error::BadRequest(format!("unsupported content type `{content_type}`")));
    }

    signatures::verify_body_digest(request.headers.get("digest"), &request.body)?;

    let Some(signed_key) = ctx.get_signed_key().await else {
        return Err(Error::SignatureInvalid);
    };
    let uri: http::Uri = request.url.as_str().parse().map_err(Error::other)?;
    signatures::verify_signature(&request.headers, &request.method, &uri, &signed_key.public_key_pem)?;

    let activity = match Activity::from_json(&request.body) {
        Ok(activity) => activity,
        Err(err) => {
            if let Some(handler) = ctx.inner.inbox_error_handler.clone() {
                handler(ctx.context(), err, None).await;
            }
            return Err(Error::BadRequest("could not parse activity as JSON-LD".to_string()));
        }
    };
    let activity_id = activity.id().ok_or(Error::NotFound)?;

    let mut idempotence_key = ctx.inner.kv_prefixes.activity_idempotence.clone();
    idempotence_key.push(activity_id.to_string());
    idempotence_key.push(handle.clone().unwrap_or_else(|| "shared".to_string()));
    let claimed = ctx
        .inner
        .kv
        .set_if_absent(&idempotence_key, Vec::new(), SetOptions { ttl: Some(IDEMPOTENCE_TTL) })
        .await;
    if !claimed {
        // Already processed (or in flight): ack without redispatching. The claim is never
        // rolled back even if the listener below later fails, so redelivery always
        // short-circuits here.
        return Ok(HttpResponse::status(http::StatusCode::ACCEPTED));
    }

    let kind = activity.kind().unwrap_or("Activity");
    let listener = activity
        .class_chain()
        .into_iter()
        .find_map(|class| ctx.inner.inbox_listeners.get(class).cloned());

    let mut listener_failed = false;
    if let Some(listener) = listener {
        if let Err(err) = listener(ctx.context(), activity.clone()).await {
            listener_failed = true;
            if let Some(handler) = ctx.inner.inbox_error_handler.clone() {
                handler(ctx.context(), err, Some(activity)).await;
            } else {
                warn!("inbox listener for `{kind}` failed: {err}");
            }
        }
    } else {
        warn!("no inbox listener registered for activity type `{kind}`; ignoring");
    }

    if listener_failed {
        return Ok(HttpResponse::status(http::StatusCode::INTERNAL_SERVER_ERROR));
    }
    Ok(HttpResponse::status(http::StatusCode::ACCEPTED))
}
