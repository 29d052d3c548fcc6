//! Background relay for captured frames.
//!
//! Owns the bounded frame store, answers `FRAME_CAPTURED` / `GET_FRAMES` /
//! `CLEAR_FRAMES` requests through a cloneable [`RelayHandle`], forwards page
//! bridge posts into the store, and fans the persisted "overlay enabled"
//! preference out as control messages.

mod bridge;
mod preferences;
mod service;
mod store;

pub use bridge::spawn_page_bridge;
pub use preferences::{
    FilePreferences, InMemoryPreferences, PreferenceError, PreferenceResult, PreferenceStore,
    ToggleNotifier,
};
pub use service::{spawn_relay, RelayError, RelayHandle, RelayResult, RelayService};
pub use store::{BoundedFrameStore, FRAME_STORE_CAPACITY};
