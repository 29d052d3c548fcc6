use std::sync::Arc;

use once_cell::sync::OnceCell;
use peek_proto::{Direction, Frame, TargetMatcher};
use tracing::{debug, info};

use crate::channel::{
    Channel, ChannelEvent, ChannelFactory, ChannelResult, EventKind, Listener, ListenerId,
    OutboundData, ReadyState,
};
use crate::tap::FrameTap;

/// Decorates `factory` so channels to the target host are observed.
pub fn instrument<F: ChannelFactory>(
    factory: F,
    matcher: TargetMatcher,
    tap: FrameTap,
) -> InterceptingFactory<F> {
    InterceptingFactory {
        inner: factory,
        matcher,
        tap,
    }
}

/// Channel factory that hands out observed channels for the target host and
/// untouched channels for everything else.
pub struct InterceptingFactory<F> {
    inner: F,
    matcher: TargetMatcher,
    tap: FrameTap,
}

impl<F: ChannelFactory> InterceptingFactory<F> {
    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn matcher(&self) -> &TargetMatcher {
        &self.matcher
    }
}

impl<F: ChannelFactory> ChannelFactory for InterceptingFactory<F> {
    type Channel = Tapped<F::Channel>;

    fn connect(&self, url: &str, protocols: &[String]) -> ChannelResult<Self::Channel> {
        let channel = self.inner.connect(url, protocols)?;
        if !self.matcher.matches(url) {
            return Ok(Tapped::Passthrough(channel));
        }
        info!(target = "interceptor", url, "observing channel");
        Ok(Tapped::Observed(ObservedChannel {
            inner: channel,
            tap: self.tap.clone(),
            url: url.to_string(),
        }))
    }
}

/// A channel returned by [`InterceptingFactory`]. Either way the original
/// concrete channel stays reachable through [`Tapped::inner`].
pub enum Tapped<C> {
    Passthrough(C),
    Observed(ObservedChannel<C>),
}

impl<C: Channel> Tapped<C> {
    pub fn is_observed(&self) -> bool {
        matches!(self, Tapped::Observed(_))
    }

    pub fn inner(&self) -> &C {
        match self {
            Tapped::Passthrough(channel) => channel,
            Tapped::Observed(observed) => &observed.inner,
        }
    }

    pub fn into_inner(self) -> C {
        match self {
            Tapped::Passthrough(channel) => channel,
            Tapped::Observed(observed) => observed.inner,
        }
    }

    fn as_channel(&self) -> &dyn Channel {
        match self {
            Tapped::Passthrough(channel) => channel,
            Tapped::Observed(observed) => observed,
        }
    }
}

impl<C: Channel> Channel for Tapped<C> {
    fn url(&self) -> &str {
        self.as_channel().url()
    }

    fn protocols(&self) -> &[String] {
        self.as_channel().protocols()
    }

    fn ready_state(&self) -> ReadyState {
        self.as_channel().ready_state()
    }

    fn send(&self, data: OutboundData) -> ChannelResult<()> {
        self.as_channel().send(data)
    }

    fn add_event_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.as_channel().add_event_listener(kind, listener)
    }

    fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.as_channel().remove_event_listener(kind, id)
    }

    fn close(&self) -> ChannelResult<()> {
        self.as_channel().close()
    }
}

/// Wraps send and message listeners of a target channel with a capture tap.
pub struct ObservedChannel<C> {
    inner: C,
    tap: FrameTap,
    url: String,
}

impl<C: Channel> Channel for ObservedChannel<C> {
    fn url(&self) -> &str {
        self.inner.url()
    }

    fn protocols(&self) -> &[String] {
        self.inner.protocols()
    }

    fn ready_state(&self) -> ReadyState {
        self.inner.ready_state()
    }

    fn send(&self, data: OutboundData) -> ChannelResult<()> {
        self.tap.capture(Frame::capture(
            Direction::Outgoing,
            data.as_captured(),
            &self.url,
        ));
        self.inner.send(data)
    }

    fn add_event_listener(&self, kind: EventKind, listener: Listener) -> ListenerId {
        if kind != EventKind::Message {
            return self.inner.add_event_listener(kind, listener);
        }
        let tap = self.tap.clone();
        let url = self.url.clone();
        let wrapped: Listener = Arc::new(move |event: &ChannelEvent| {
            if let ChannelEvent::Message(data) = event {
                tap.capture(Frame::capture(Direction::Incoming, data.as_captured(), &url));
            }
            listener(event)
        });
        self.inner.add_event_listener(kind, wrapped)
    }

    fn remove_event_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.remove_event_listener(kind, id)
    }

    fn close(&self) -> ChannelResult<()> {
        self.inner.close()
    }
}

/// Applies the decorator at most once per page load.
pub struct PageHook<F> {
    installed: OnceCell<InterceptingFactory<F>>,
}

impl<F> Default for PageHook<F> {
    fn default() -> Self {
        Self {
            installed: OnceCell::new(),
        }
    }
}

impl<F: ChannelFactory> PageHook<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the decorator around `factory`; later calls keep the first
    /// installation and discard their arguments.
    pub fn install(
        &self,
        factory: F,
        matcher: TargetMatcher,
        tap: FrameTap,
    ) -> &InterceptingFactory<F> {
        let mut fresh = false;
        let installed = self.installed.get_or_init(|| {
            fresh = true;
            instrument(factory, matcher, tap)
        });
        if fresh {
            info!(target = "interceptor", host = installed.matcher().host(), "channel interceptor installed");
        } else {
            debug!(target = "interceptor", "channel interceptor already installed");
        }
        installed
    }

    pub fn factory(&self) -> Option<&InterceptingFactory<F>> {
        self.installed.get()
    }
}
