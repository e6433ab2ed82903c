//! Message bus: topic-keyed publish/subscribe with deferred, isolated delivery.
//!
//! `publish_async` resolves the subscribers of a message type synchronously,
//! then spawns one task per handler on the current tokio runtime. A handler
//! that fails or panics is logged and does not affect the others.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Handler invoked for every delivered message of a subscribed type.
pub type MessageHandler = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

pub type SubscriptionId = u64;

// Process-wide so that ids never repeat across buses.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

type Subscribers = DashMap<String, BTreeMap<SubscriptionId, MessageHandler>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Deserialize the payload into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("message type must be a non-empty string")]
    EmptyMessageType,
    #[error("no tokio runtime available to deliver '{0}'")]
    NoRuntime(String),
}

impl BusError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyMessageType => "bus.empty_type",
            Self::NoRuntime(_) => "bus.no_runtime",
        }
    }
}

/// Cancels one subscription. Calling it more than once is a no-op;
/// dropping it leaves the subscription in place.
#[derive(Clone)]
pub struct Unsubscribe {
    subscribers: Arc<Subscribers>,
    message_type: String,
    id: SubscriptionId,
}

impl Unsubscribe {
    /// Returns `true` if the subscription was still registered.
    pub fn unsubscribe(&self) -> bool {
        let removed = match self.subscribers.get_mut(&self.message_type) {
            Some(mut slots) => slots.remove(&self.id).is_some(),
            None => false,
        };
        if removed {
            self.subscribers
                .remove_if(&self.message_type, |_, slots| slots.is_empty());
            tracing::trace!(
                message_type = %self.message_type,
                subscription = self.id,
                "unsubscribed"
            );
        }
        removed
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("message_type", &self.message_type)
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct MessageBus {
    subscribers: Arc<Subscribers>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<String> = self.subscribers.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("MessageBus")
            .field("message_types", &types)
            .finish()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `message_type`. Identical handlers are not
    /// deduplicated; each call yields its own subscription.
    pub fn on_message(
        &self,
        message_type: &str,
        handler: MessageHandler,
    ) -> Result<Unsubscribe, BusError> {
        if message_type.is_empty() {
            return Err(BusError::EmptyMessageType);
        }
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(message_type.to_string())
            .or_default()
            .insert(id, handler);
        tracing::trace!(message_type, subscription = id, "subscribed");

        Ok(Unsubscribe {
            subscribers: Arc::clone(&self.subscribers),
            message_type: message_type.to_string(),
            id,
        })
    }

    /// Schedule delivery of `message` to every current subscriber of its type.
    pub fn publish_async(&self, message: Message) -> Result<(), BusError> {
        if message.message_type.is_empty() {
            return Err(BusError::EmptyMessageType);
        }

        let targets: Vec<(SubscriptionId, MessageHandler)> =
            match self.subscribers.get(&message.message_type) {
                Some(slots) => slots.iter().map(|(id, h)| (*id, h.clone())).collect(),
                None => Vec::new(),
            };
        if targets.is_empty() {
            tracing::trace!(message_type = %message.message_type, "no subscribers");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| BusError::NoRuntime(message.message_type.clone()))?;

        tracing::debug!(
            message_type = %message.message_type,
            subscribers = targets.len(),
            "publishing"
        );
        let message = Arc::new(message);
        for (id, handler) in targets {
            let message = Arc::clone(&message);
            runtime.spawn(async move { deliver(id, &handler, &message) });
        }
        Ok(())
    }

    pub fn subscriber_count(&self, message_type: &str) -> usize {
        self.subscribers.get(message_type).map_or(0, |s| s.len())
    }
}

fn deliver(id: SubscriptionId, handler: &MessageHandler, message: &Message) {
    match catch_unwind(AssertUnwindSafe(|| handler(message))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(
            message_type = %message.message_type,
            subscription = id,
            error = %e,
            "message handler failed"
        ),
        Err(_) => tracing::error!(
            message_type = %message.message_type,
            subscription = id,
            "message handler panicked"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> MessageHandler {
        let counter = counter.clone();
        Arc::new(move |_msg: &Message| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn delivery_is_deferred_and_exactly_once() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on_message("t", counting_handler(&hits)).unwrap();

        bus.publish_async(Message::new("t")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0, "delivered synchronously");

        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_before_publish_prevents_delivery() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let unsub = bus.on_message("t", counting_handler(&hits)).unwrap();

        assert!(unsub.unsubscribe());
        assert!(!unsub.unsubscribe());
        assert_eq!(bus.subscriber_count("t"), 0);

        bus.publish_async(Message::new("t")).unwrap();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsubscribe_after_publish_does_not_retract_delivery() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let unsub = bus.on_message("t", counting_handler(&hits)).unwrap();

        bus.publish_async(Message::new("t")).unwrap();
        unsub.unsubscribe();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identical_subscriptions_are_independent() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(&hits);
        let first = bus.on_message("t", handler.clone()).unwrap();
        let second = bus.on_message("t", handler).unwrap();
        assert_ne!(first.id(), second.id());

        first.unsubscribe();
        bus.publish_async(Message::new("t")).unwrap();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_handlers_do_not_block_others() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let failing: MessageHandler = Arc::new(|_msg: &Message| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        });
        let panicking: MessageHandler = Arc::new(|_msg: &Message| -> anyhow::Result<()> {
            panic!("handler panic")
        });
        bus.on_message("t", failing).unwrap();
        bus.on_message("t", panicking).unwrap();
        bus.on_message("t", counting_handler(&hits)).unwrap();

        bus.publish_async(Message::new("t")).unwrap();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("t"), 3);
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_publish() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.publish_async(Message::new("t")).unwrap();
        bus.on_message("t", counting_handler(&hits)).unwrap();
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_types_are_rejected() {
        let bus = MessageBus::new();
        let noop: MessageHandler = Arc::new(|_msg: &Message| -> anyhow::Result<()> { Ok(()) });
        let err = bus.on_message("", noop).unwrap_err();
        assert_eq!(err, BusError::EmptyMessageType);
        assert_eq!(
            bus.publish_async(Message::new("")).unwrap_err().code(),
            "bus.empty_type"
        );
    }

    #[test]
    fn publish_without_subscribers_needs_no_runtime() {
        let bus = MessageBus::new();
        assert!(bus.publish_async(Message::new("nobody")).is_ok());
    }

    #[test]
    fn message_uses_type_on_the_wire() {
        let msg = Message::new("user.created").with_payload(serde_json::json!({ "id": 7 }));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "user.created");

        #[derive(Deserialize)]
        struct Created {
            id: u32,
        }
        assert_eq!(msg.payload_as::<Created>().unwrap().id, 7);
    }
}
