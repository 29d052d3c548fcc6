use std::sync::Arc;

use bytes::Bytes;
use peek_proto::CapturedData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotOpen,
    #[error("invalid channel url: {0}")]
    InvalidUrl(String),
    #[error("channel transport error: {0}")]
    Transport(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundData {
    Text(String),
    Binary(Bytes),
}

impl OutboundData {
    pub fn as_captured(&self) -> CapturedData<'_> {
        match self {
            OutboundData::Text(text) => CapturedData::Text(text),
            OutboundData::Binary(bytes) => CapturedData::Binary(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    Text(String),
    Binary(Bytes),
}

impl MessageData {
    pub fn as_captured(&self) -> CapturedData<'_> {
        match self {
            MessageData::Text(text) => CapturedData::Text(text),
            MessageData::Binary(bytes) => CapturedData::Binary(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Error,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(MessageData),
    Error(String),
    Close { code: u16, reason: String },
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::Open => EventKind::Open,
            ChannelEvent::Message(_) => EventKind::Message,
            ChannelEvent::Error(_) => EventKind::Error,
            ChannelEvent::Close { .. } => EventKind::Close,
        }
    }
}

pub type Listener = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A live bidirectional channel as the page sees it.
pub trait Channel: Send + Sync {
    fn url(&self) -> &str;

    fn protocols(&self) -> &[String];

    fn ready_state(&self) -> ReadyState;

    fn send(&self, data: OutboundData) -> ChannelResult<()>;

    fn add_event_listener(&self, kind: EventKind, listener: Listener) -> ListenerId;

    fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool;

    fn close(&self) -> ChannelResult<()>;
}

/// The channel-construction primitive.
pub trait ChannelFactory: Send + Sync {
    type Channel: Channel;

    fn connect(&self, url: &str, protocols: &[String]) -> ChannelResult<Self::Channel>;
}
