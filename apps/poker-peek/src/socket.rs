//! Live websocket channel backed by tokio-tungstenite.
//!
//! Construction is non-blocking like a browser socket: `connect` returns a
//! channel in `Connecting` state and a background task performs the
//! handshake, dispatches events to listeners and drains queued sends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use frame_interceptor::{
    Channel, ChannelError, ChannelEvent, ChannelFactory, ChannelResult, EventKind, Listener,
    ListenerId, MessageData, OutboundData, ReadyState,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_ABNORMAL: u16 = 1006;

enum Outgoing {
    Data(OutboundData),
    Close,
}

struct Shared {
    url: String,
    protocols: Vec<String>,
    ready: Mutex<ReadyState>,
    listeners: Mutex<Vec<(EventKind, ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl Shared {
    fn new(url: &str, protocols: &[String]) -> Self {
        Self {
            url: url.to_string(),
            protocols: protocols.to_vec(),
            ready: Mutex::new(ReadyState::Connecting),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    fn set_ready(&self, state: ReadyState) {
        *self.ready.lock() = state;
    }

    /// Moves `Connecting` to `Open`. Returns false when a close was requested
    /// during the handshake; the state is left alone then.
    fn mark_open(&self) -> bool {
        let mut ready = self.ready.lock();
        if *ready != ReadyState::Connecting {
            return false;
        }
        *ready = ReadyState::Open;
        true
    }

    fn dispatch(&self, event: &ChannelEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .filter(|(registered, _, _)| *registered == kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

pub struct WsChannel {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Channel for WsChannel {
    fn url(&self) -> &str {
        &self.shared.url
    }

    fn protocols(&self) -> &[String] {
        &self.shared.protocols
    }

    fn ready_state(&self) -> ReadyState {
        *self.shared.ready.lock()
    }

    fn send(&self, data: OutboundData) -> ChannelResult<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(ChannelError::NotOpen);
        }
        self.outgoing
            .send(Outgoing::Data(data))
            .map_err(|_| ChannelError::Transport("connection task has ended".into()))
    }

    fn add_event_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed) + 1);
        self.shared.listeners.lock().push((kind, id, listener));
        id
    }

    fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(registered, existing, _)| !(*registered == kind && *existing == id));
        listeners.len() != before
    }

    fn close(&self) -> ChannelResult<()> {
        let mut ready = self.shared.ready.lock();
        if matches!(*ready, ReadyState::Closing | ReadyState::Closed) {
            return Ok(());
        }
        *ready = ReadyState::Closing;
        drop(ready);
        // the task may already be gone; it reports the close itself
        let _ = self.outgoing.send(Outgoing::Close);
        Ok(())
    }
}

/// Opens [`WsChannel`]s. Must be used inside a Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsFactory;

impl WsFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelFactory for WsFactory {
    type Channel = WsChannel;

    fn connect(&self, url: &str, protocols: &[String]) -> ChannelResult<Self::Channel> {
        let parsed = Url::parse(url).map_err(|_| ChannelError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidUrl(url.to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| ChannelError::Transport(err.to_string()))?;

        let shared = Arc::new(Shared::new(url, protocols));
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run_connection(shared.clone(), rx));
        Ok(WsChannel {
            shared,
            outgoing: tx,
        })
    }
}

async fn run_connection(shared: Arc<Shared>, mut outgoing: mpsc::UnboundedReceiver<Outgoing>) {
    let mut request = match shared.url.as_str().into_client_request() {
        Ok(request) => request,
        Err(err) => return fail(&shared, err.to_string()),
    };
    if !shared.protocols.is_empty() {
        match HeaderValue::from_str(&shared.protocols.join(", ")) {
            Ok(value) => {
                request.headers_mut().insert("Sec-WebSocket-Protocol", value);
            }
            Err(err) => return fail(&shared, err.to_string()),
        }
    }

    let stream = match connect_async(request).await {
        Ok((stream, _)) => stream,
        Err(err) => return fail(&shared, err.to_string()),
    };
    if shared.mark_open() {
        debug!(url = %shared.url, "websocket open");
        shared.dispatch(&ChannelEvent::Open);
    } else {
        debug!(url = %shared.url, "websocket closed during handshake");
    }

    let (mut sink, mut source) = stream.split();
    let (code, reason) = loop {
        tokio::select! {
            next = outgoing.recv() => match next {
                Some(Outgoing::Data(data)) => {
                    let message = match data {
                        OutboundData::Text(text) => Message::Text(text),
                        OutboundData::Binary(bytes) => Message::Binary(bytes.to_vec()),
                    };
                    if let Err(err) = sink.send(message).await {
                        shared.dispatch(&ChannelEvent::Error(err.to_string()));
                        break (CLOSE_ABNORMAL, String::new());
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break (CLOSE_NORMAL, String::new());
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    shared.dispatch(&ChannelEvent::Message(MessageData::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    shared.dispatch(&ChannelEvent::Message(MessageData::Binary(Bytes::from(data))));
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|frame| (u16::from(frame.code), frame.reason.into_owned()))
                        .unwrap_or((CLOSE_NORMAL, String::new()));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(url = %shared.url, error = %err, "websocket error");
                    shared.dispatch(&ChannelEvent::Error(err.to_string()));
                    break (CLOSE_ABNORMAL, String::new());
                }
                None => break (CLOSE_ABNORMAL, String::new()),
            },
        }
    };

    shared.set_ready(ReadyState::Closed);
    debug!(url = %shared.url, code, "websocket closed");
    shared.dispatch(&ChannelEvent::Close { code, reason });
}

fn fail(shared: &Shared, error: String) {
    warn!(url = %shared.url, %error, "websocket connection failed");
    shared.set_ready(ReadyState::Closed);
    shared.dispatch(&ChannelEvent::Error(error));
    shared.dispatch(&ChannelEvent::Close {
        code: CLOSE_ABNORMAL,
        reason: String::new(),
    });
}
