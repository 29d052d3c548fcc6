//! In-memory channel for tests and offline replay. Sent data is recorded and
//! inbound traffic is injected with [`LoopbackChannel::deliver_text`].

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::channel::{
    Channel, ChannelError, ChannelEvent, ChannelFactory, ChannelResult, EventKind, Listener,
    ListenerId, MessageData, OutboundData, ReadyState,
};

#[derive(Default)]
struct LoopbackState {
    ready: Option<ReadyState>,
    next_listener: u64,
    listeners: Vec<(EventKind, ListenerId, Listener)>,
    sent: Vec<OutboundData>,
}

struct LoopbackInner {
    url: String,
    protocols: Vec<String>,
    state: Mutex<LoopbackState>,
}

#[derive(Clone)]
pub struct LoopbackChannel {
    inner: Arc<LoopbackInner>,
}

impl LoopbackChannel {
    pub fn open(url: &str, protocols: &[String]) -> Self {
        Self {
            inner: Arc::new(LoopbackInner {
                url: url.to_string(),
                protocols: protocols.to_vec(),
                state: Mutex::new(LoopbackState {
                    ready: Some(ReadyState::Open),
                    ..LoopbackState::default()
                }),
            }),
        }
    }

    pub fn sent(&self) -> Vec<OutboundData> {
        self.inner.state.lock().sent.clone()
    }

    pub fn deliver_text(&self, text: &str) {
        self.dispatch(&ChannelEvent::Message(MessageData::Text(text.to_string())));
    }

    pub fn deliver_binary(&self, bytes: Bytes) {
        self.dispatch(&ChannelEvent::Message(MessageData::Binary(bytes)));
    }

    /// Invokes every listener registered for the event's kind, in registration
    /// order. Listeners run outside the state lock.
    pub fn dispatch(&self, event: &ChannelEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .inner
            .state
            .lock()
            .listeners
            .iter()
            .filter(|(registered, _, _)| *registered == kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Channel for LoopbackChannel {
    fn url(&self) -> &str {
        &self.inner.url
    }

    fn protocols(&self) -> &[String] {
        &self.inner.protocols
    }

    fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().ready.unwrap_or(ReadyState::Closed)
    }

    fn send(&self, data: OutboundData) -> ChannelResult<()> {
        let mut state = self.inner.state.lock();
        if state.ready != Some(ReadyState::Open) {
            return Err(ChannelError::NotOpen);
        }
        state.sent.push(data);
        Ok(())
    }

    fn add_event_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let mut state = self.inner.state.lock();
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.push((kind, id, listener));
        id
    }

    fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.listeners.len();
        state
            .listeners
            .retain(|(registered, existing, _)| !(*registered == kind && *existing == id));
        state.listeners.len() != before
    }

    fn close(&self) -> ChannelResult<()> {
        self.inner.state.lock().ready = Some(ReadyState::Closed);
        self.dispatch(&ChannelEvent::Close {
            code: 1000,
            reason: String::new(),
        });
        Ok(())
    }
}

/// Factory whose channels stay reachable so callers can inject traffic.
#[derive(Default)]
pub struct LoopbackFactory {
    opened: Mutex<Vec<LoopbackChannel>>,
}

impl LoopbackFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<LoopbackChannel> {
        self.opened.lock().clone()
    }
}

impl ChannelFactory for LoopbackFactory {
    type Channel = LoopbackChannel;

    fn connect(&self, url: &str, protocols: &[String]) -> ChannelResult<Self::Channel> {
        if url.trim().is_empty() {
            return Err(ChannelError::InvalidUrl(url.to_string()));
        }
        let channel = LoopbackChannel::open(url, protocols);
        self.opened.lock().push(channel.clone());
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_channels_reject_sends() {
        let channel = LoopbackChannel::open("wss://example.com", &[]);
        channel.close().expect("close");
        assert_eq!(channel.ready_state(), ReadyState::Closed);
        assert!(matches!(
            channel.send(OutboundData::Text("late".into())),
            Err(ChannelError::NotOpen)
        ));
    }

    #[test]
    fn factory_tracks_opened_channels() {
        let factory = LoopbackFactory::new();
        factory.connect("wss://a.example", &[]).expect("connect");
        factory.connect("wss://b.example", &[]).expect("connect");
        let urls: Vec<String> = factory
            .opened()
            .iter()
            .map(|channel| channel.url().to_string())
            .collect();
        assert_eq!(urls, ["wss://a.example", "wss://b.example"]);
        assert!(factory.connect(" ", &[]).is_err());
    }
}
