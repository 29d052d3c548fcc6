//! Shared wire definitions for the page ↔ relay ↔ overlay contexts.
//! Keeping these in a dedicated crate lets every context agree on the
//! JSON shapes without pulling in runtime code.

mod frame;
mod messages;
mod target;

pub use frame::{now_millis, CapturedData, Direction, Frame, BINARY_PLACEHOLDER};
pub use messages::{
    AckResponse, BridgeMessage, ControlMessage, FramesResponse, RelayRequest, RelayResponse,
};
pub use target::{is_estimate_session_url, TargetMatcher, DEFAULT_TARGET_HOST};

/// Name of the persisted "overlay enabled" preference.
pub const TOGGLE_PREFERENCE_KEY: &str = "parabol-peaker-toggle";

/// Value used when the preference has never been written.
pub const TOGGLE_DEFAULT: bool = true;
