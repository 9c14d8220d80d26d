//! Outbound activity delivery: inbox extraction, signing, immediate or queued send, and the
//! fixed-schedule retry loop.
//!
//! `extract_inboxes` resolves and dedupes recipient inboxes (via `itertools::Itertools::unique`,
//! dropping local recipients), and the retry loop follows a success/client-error/other-error
//! split against a fixed backoff schedule rather than an exponential one.

use crate::{
    context::Context,
    error::Error,
    jwk::Jwk,
    queue::EnqueueOptions,
    signatures::sign_request,
    FEDERATION_CONTENT_TYPE,
};
use bytes::Bytes;
use itertools::Itertools;
use reqwest_middleware::ClientWithMiddleware;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// The default outbound retry schedule: 3s, 15s, 1m, 15m, 1h. Overridable per-registry via
/// `FederationConfigBuilder::backoff_schedule`; `process_outbox_message` reads the configured
/// schedule off the registry rather than this constant.
pub const DEFAULT_BACKOFF_SCHEDULE: &[Duration] = &[
    Duration::from_secs(3),
    Duration::from_secs(15),
    Duration::from_secs(60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
];

/// Controls whether [`Context::send_activity`] blocks on delivery or hands it to the queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Deliver synchronously, inline in the caller's call to `send_activity`. When `false`
    /// (the default) every inbox POST is enqueued and retried by the registry's message queue.
    pub immediate: bool,
}

/// The envelope persisted to the message queue for one pending inbox delivery.
///
/// The private key travels as a [`Jwk`] rather than a raw PEM string so that queue backends
/// which insist on passing messages through plain JSON storage still round-trip it losslessly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Discriminant for this queue message's shape; always `"outbox"`
    #[serde(rename = "type")]
    pub kind: String,
    /// The signing key's id, e.g. `https://example.com/users/john#main-key`
    pub key_id: String,
    /// The sender's private key
    pub private_key: Jwk,
    /// The JSON-LD activity document being delivered
    pub activity: serde_json::Value,
    /// The inbox this attempt is targeting
    pub inbox: Url,
    /// Zero-based index into the registry's backoff schedule for the next retry, if this
    /// attempt fails
    pub trial: usize,
}

fn ensure_activity_id(mut activity: serde_json::Value) -> serde_json::Value {
    let needs_id = activity.get("id").map(|v| v.is_null()).unwrap_or(true);
    if needs_id {
        if let serde_json::Value::Object(map) = &mut activity {
            map.insert("id".to_string(), serde_json::Value::String(format!("urn:uuid:{}", Uuid::new_v4())));
        }
    }
    activity
}

/// Resolve each recipient actor URI to an inbox URL (preferring `endpoints.sharedInbox`), drop
/// recipients local to this registry (no self-delivery), and deduplicate.
pub async fn extract_inboxes<T: Clone + Send + Sync + 'static>(ctx: &Context<T>, recipients: &[Url]) -> Vec<Url> {
    let loader = ctx.document_loader();
    let mut inboxes = Vec::with_capacity(recipients.len());
    for actor_uri in recipients {
        if actor_uri.origin() == ctx.base_url().origin() {
            continue;
        }
        let document = match loader.load_document(actor_uri).await {
            Ok(document) => document.document,
            Err(err) => {
                warn!("could not resolve inbox for {actor_uri}: {err}");
                continue;
            }
        };
        let inbox = document
            .get("endpoints")
            .and_then(|e| e.get("sharedInbox"))
            .and_then(|v| v.as_str())
            .or_else(|| document.get("inbox").and_then(|v| v.as_str()))
            .and_then(|s| Url::parse(s).ok());
        if let Some(inbox) = inbox {
            inboxes.push(inbox);
        }
    }
    inboxes.into_iter().unique().collect()
}

/// Sign and POST `body` to a single `inbox`. Returns `Ok(())` only on a 2xx response.
pub(crate) async fn send_single(
    client: &ClientWithMiddleware,
    request_timeout: Duration,
    key_id: &str,
    private_key_pem: &str,
    body: Bytes,
    inbox: &Url,
) -> Result<(), Error> {
    let builder = client
        .post(inbox.as_str())
        .timeout(request_timeout)
        .header("content-type", FEDERATION_CONTENT_TYPE)
        .body(body.clone());
    let request = sign_request(builder, key_id, body, private_key_pem).await?;
    debug!("delivering activity to {inbox}");
    let response = client.execute(request).await?;
    if response.status().is_success() {
        Ok(())
    } else {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        Err(Error::other(anyhow::anyhow!("inbox {inbox} returned {status}: {detail}")))
    }
}

/// Deliver `activity` from `sender`'s outbox to every inbox reachable from `recipients`, either
/// immediately or via the registry's queue.
pub async fn send_activity<T: Clone + Send + Sync + 'static>(
    ctx: &Context<T>,
    sender: &str,
    recipients: Vec<Url>,
    activity: serde_json::Value,
    options: SendOptions,
) -> Result<(), Error> {
    let activity = ensure_activity_id(activity);
    if activity.get("actor").and_then(|v| v.as_str()).is_none() {
        return Err(Error::ActivityMissingActor);
    }
    let Some(pair) = ctx.actor_key_pair(sender).await? else {
        return Err(Error::other(anyhow::anyhow!("no key pair registered for sender `{sender}`")));
    };
    let mut key_id = ctx.actor_uri(sender)?;
    key_id.set_fragment(Some("main-key"));

    let inboxes = extract_inboxes(ctx, &recipients).await;
    if inboxes.is_empty() {
        return Ok(());
    }

    // Serialized once and reused across every inbox, immediate or queued, instead of
    // re-encoding the JSON-LD document per recipient.
    let body = Bytes::from(serde_json::to_vec(&activity)?);

    for inbox in inboxes {
        if options.immediate {
            if let Err(err) = send_single(
                &ctx.inner.http_client,
                ctx.inner.request_timeout,
                key_id.as_str(),
                &pair.private_key_pem,
                body.clone(),
                &inbox,
            )
            .await
            {
                warn!("immediate delivery to {inbox} failed: {err}");
            }
        } else {
            let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(&pair.private_key_pem).map_err(Error::other)?;
            let message = OutboxMessage {
                kind: "outbox".to_string(),
                key_id: key_id.to_string(),
                private_key: Jwk::from_private_key(&private_key),
                activity: activity.clone(),
                inbox,
                trial: 0,
            };
            ctx.inner.queue.enqueue_json(&message, EnqueueOptions::default()).await;
        }
    }
    Ok(())
}

/// Process one queued [`OutboxMessage`]: attempt delivery, and on failure either re-enqueue at
/// the next backoff tier or give up once the schedule is exhausted. The registry's inbox error
/// handler, if any, is invoked on every failed attempt, not only at final giveup (see DESIGN.md).
pub(crate) async fn process_outbox_message<T: Clone + Send + Sync + 'static>(ctx: &Context<T>, message: OutboxMessage) {
    let private_key_pem = match message
        .private_key
        .to_private_key()
        .ok()
        .and_then(|k| k.to_pkcs8_pem(Default::default()).ok())
    {
        Some(pem) => pem.to_string(),
        None => {
            warn!("outbox message for {} carried an unusable private key; dropping", message.inbox);
            return;
        }
    };
    let body = match serde_json::to_vec(&message.activity) {
        Ok(body) => Bytes::from(body),
        Err(err) => {
            warn!("outbox message activity is not serializable: {err}");
            return;
        }
    };

    let result = send_single(
        &ctx.inner.http_client,
        ctx.inner.request_timeout,
        &message.key_id,
        &private_key_pem,
        body,
        &message.inbox,
    )
    .await;

    let Err(err) = result else { return };

    if let Some(handler) = ctx.inner.outbox_error_handler.clone() {
        let activity = crate::activity::Activity {
            document: message.activity.clone(),
        };
        handler(ctx.clone(), Error::other(anyhow::anyhow!("{err}")), Some(activity)).await;
    }

    let Some(delay) = ctx.inner.backoff_schedule.get(message.trial).copied() else {
        warn!("giving up on delivery to {} after {} attempts: {err}", message.inbox, message.trial);
        return;
    };
    let next = OutboxMessage {
        trial: message.trial + 1,
        ..message
    };
    ctx.inner
        .queue
        .enqueue_json(&next, EnqueueOptions { delay: Some(delay) })
        .await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ensure_activity_id_adds_missing_id() {
        let activity = serde_json::json!({"type": "Follow"});
        let activity = ensure_activity_id(activity);
        assert!(activity.get("id").unwrap().as_str().unwrap().starts_with("urn:uuid:"));
    }

    #[test]
    fn ensure_activity_id_keeps_existing_id() {
        let activity = serde_json::json!({"type": "Follow", "id": "https://example.com/1"});
        let activity = ensure_activity_id(activity);
        assert_eq!(activity.get("id").unwrap().as_str().unwrap(), "https://example.com/1");
    }

    #[test]
    fn default_backoff_schedule_has_five_tiers() {
        assert_eq!(DEFAULT_BACKOFF_SCHEDULE.len(), 5);
        assert_eq!(DEFAULT_BACKOFF_SCHEDULE[0], Duration::from_secs(3));
        assert_eq!(DEFAULT_BACKOFF_SCHEDULE[4], Duration::from_secs(60 * 60));
    }
}
