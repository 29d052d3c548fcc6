//! Frame interceptor: observation tap for channels created inside the page.
//!
//! Responsibilities:
//! - decorating the channel-construction primitive once per page load
//! - wrapping send and message delivery of channels that reach the target host
//! - posting every captured frame across the page bridge, in capture order
//!
//! Interception never changes what goes over the wire and never fails the
//! caller: when the bridge is gone, captured frames are dropped quietly.

mod channel;
mod intercept;
pub mod loopback;
mod tap;

pub use channel::{
    Channel, ChannelError, ChannelEvent, ChannelFactory, ChannelResult, EventKind, Listener,
    ListenerId, MessageData, OutboundData, ReadyState,
};
pub use intercept::{instrument, InterceptingFactory, ObservedChannel, PageHook, Tapped};
pub use tap::FrameTap;
