//! Messaging boundary between the isolated execution contexts.
//!
//! The page context posts captured frames on [`TOPIC_PAGE_BRIDGE`]; the
//! background context fans preference changes out on [`TOPIC_RUNTIME_CONTROL`].
//! The boundary can disappear at any time (extension reload), after which
//! every publish reports [`BusError::ContextInvalidated`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Page → content bridge (`window.postMessage`).
pub const TOPIC_PAGE_BRIDGE: &str = "page.bridge";
/// Background → listeners control fan-out (toggle changes).
pub const TOPIC_RUNTIME_CONTROL: &str = "runtime.control";

const DEFAULT_TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn decode<T: DeserializeOwned>(&self) -> BusResult<T> {
        serde_json::from_slice(&self.payload).map_err(|err| BusError::Codec(err.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("messaging context invalidated")]
    ContextInvalidated,
    #[error("bus payload codec error: {0}")]
    Codec(String),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;

    /// Returns how many listeners were reached. Reaching nobody is not an error,
    /// the same way posting to a window without listeners is not.
    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<usize>;

    fn is_connected(&self) -> bool;
}

/// Serializes `value` as JSON and publishes it.
pub fn publish_json<B, T>(bus: &B, topic: &str, value: &T) -> BusResult<usize>
where
    B: Bus + ?Sized,
    T: Serialize,
{
    let encoded = serde_json::to_vec(value).map_err(|err| BusError::Codec(err.to_string()))?;
    bus.publish(topic, Bytes::from(encoded))
}

/// In-process bus connecting contexts that live in the same process.
#[derive(Debug)]
pub struct LocalBus {
    topics: parking_lot::RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    capacity: usize,
    invalidated: AtomicBool,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: parking_lot::RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            invalidated: AtomicBool::new(false),
        }
    }

    /// Tears the boundary down: existing subscribers see the channel close and
    /// later publishes fail with [`BusError::ContextInvalidated`].
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
        self.topics.write().clear();
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        if !self.is_connected() {
            // The sender is dropped right away, so recv() reports Closed.
            return broadcast::channel(1).1;
        }
        self.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<usize> {
        if !self.is_connected() {
            return Err(BusError::ContextInvalidated);
        }
        let sender = self.sender_for(topic);
        if sender.receiver_count() == 0 {
            return Ok(0);
        }
        sender
            .send(BusMessage {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|_| BusError::Closed)
    }

    fn is_connected(&self) -> bool {
        !self.invalidated.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe(TOPIC_PAGE_BRIDGE);
        let reached = bus
            .publish(TOPIC_PAGE_BRIDGE, Bytes::from_static(b"ping"))
            .expect("publish ok");
        assert_eq!(reached, 1);
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, TOPIC_PAGE_BRIDGE);
        assert_eq!(msg.payload, Bytes::from_static(b"ping"));
    }

    #[test]
    fn publishing_without_listeners_is_not_an_error() {
        let bus = LocalBus::new();
        let reached = bus
            .publish(TOPIC_RUNTIME_CONTROL, Bytes::from_static(b"{}"))
            .expect("publish ok");
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe(TOPIC_RUNTIME_CONTROL);
        publish_json(&bus, TOPIC_RUNTIME_CONTROL, &Ping { seq: 3 }).expect("publish json");
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.decode::<Ping>().expect("decode"), Ping { seq: 3 });
    }

    #[tokio::test]
    async fn invalidated_bus_rejects_publish_and_closes_subscribers() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe(TOPIC_PAGE_BRIDGE);
        bus.invalidate();

        assert!(!bus.is_connected());
        assert!(matches!(
            bus.publish(TOPIC_PAGE_BRIDGE, Bytes::from_static(b"late")),
            Err(BusError::ContextInvalidated)
        ));
        assert!(matches!(
            sub.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));

        let mut late = bus.subscribe(TOPIC_PAGE_BRIDGE);
        assert!(matches!(
            late.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
