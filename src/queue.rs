//! Message queue abstraction: enqueue with an optional delay, single listener.
//!
//! The registry relies only on the `delay` hint being honored within a reasonable tolerance and
//! on at-least-once delivery of the listener callback; durability and ordering are the queue
//! implementation's problem, not the core's.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Options accepted by [`MessageQueue::enqueue`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Delay before the message becomes visible to the listener
    pub delay: Option<Duration>,
}

/// The future returned by a registered [`Listener`] callback.
pub type ListenerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// A queue consumer callback, invoked once per delivered message.
pub type Listener = Arc<dyn Fn(Vec<u8>) -> ListenerFuture + Send + Sync>;

/// Durable-ish message queue with a single registered consumer.
///
/// Implementations must invoke the listener at least once per enqueued message; the core treats
/// re-delivery as safe because receive-side idempotence is enforced separately via the KV store.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue the raw bytes of a message, optionally delayed.
    async fn enqueue(&self, message: Vec<u8>, options: EnqueueOptions);
    /// Register the single consumer callback. Calling this more than once replaces the previous
    /// listener.
    async fn listen(&self, callback: Listener);
}

/// Convenience helpers for JSON-serializable messages.
#[async_trait]
pub trait MessageQueueExt: MessageQueue {
    /// Serialize `message` as JSON and enqueue it.
    async fn enqueue_json<T: Serialize + Sync>(&self, message: &T, options: EnqueueOptions) {
        if let Ok(bytes) = serde_json::to_vec(message) {
            self.enqueue(bytes, options).await;
        }
    }
}

impl<T: MessageQueue + ?Sized> MessageQueueExt for T {}

/// Deserialize a queue payload, logging and dropping the message on failure.
pub fn decode_or_warn<T: DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("dropping malformed queue message: {err}");
            None
        }
    }
}

/// Single-process queue built on a `tokio::sync::mpsc` channel plus `tokio::time::sleep` for
/// delayed delivery. The default [`MessageQueue`] for a [`crate::federation::Federation`] registry
/// that isn't given a custom one.
pub struct TokioDelayQueue {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl TokioDelayQueue {
    /// Construct a new, unstarted queue.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

impl Default for TokioDelayQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for TokioDelayQueue {
    async fn enqueue(&self, message: Vec<u8>, options: EnqueueOptions) {
        let sender = self.sender.clone();
        match options.delay {
            Some(delay) if !delay.is_zero() => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sender.send(message);
                });
            }
            _ => {
                let _ = sender.send(message);
            }
        }
    }

    async fn listen(&self, callback: Listener) {
        let mut guard = self.receiver.lock().await;
        let Some(mut receiver) = guard.take() else {
            warn!("TokioDelayQueue::listen called more than once; ignoring");
            return;
        };
        drop(guard);
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                callback(message).await;
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn listener_receives_enqueued_message() {
        let queue = TokioDelayQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        queue
            .listen(Arc::new(move |_msg| {
                let counter = counter2.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }))
            .await;
        queue.enqueue(b"hello".to_vec(), EnqueueOptions::default()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delay_defers_delivery() {
        let queue = TokioDelayQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        queue
            .listen(Arc::new(move |_msg| {
                let counter = counter2.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }))
            .await;
        queue
            .enqueue(
                b"later".to_vec(),
                EnqueueOptions {
                    delay: Some(Duration::from_millis(50)),
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
