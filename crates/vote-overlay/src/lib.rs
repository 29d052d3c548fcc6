//! Vote overlay: turns captured frames into badges over voter avatars.
//!
//! Responsibilities:
//! - extracting the latest complete vote snapshot from the frame store
//! - resolving which avatar belongs to the local viewer (never badged)
//! - diffing against the last rendered state so unchanged ticks are no-ops
//! - applying badge add/remove commands to the visual layer with fades

mod driver;
mod engine;
mod identity;
mod page;
mod render;
mod render_state;
mod schema;
mod scope;
mod snapshot;

pub use driver::{FrameSource, OverlayLoop, POLL_INTERVAL};
pub use engine::{BadgeRequest, CorrelationEngine, OverlayCommand, BADGE_STAGGER};
pub use identity::{
    AltTextMatcher, AuthenticatedUserMatcher, DistinguishedAvatarMatcher, IdentityMatcher,
    SelfIdentity, SelfIdentityResolver, UserMenuMatcher,
};
pub use page::{
    ElementId, ElementSpec, PageDocument, PageError, PageSnapshot, PageSource, Rect, StaticPage,
};
pub use render::{
    badge_palette, luminance, picture_color, Badge, BadgeId, BadgePalette, BadgePhase, BadgeSurface,
    LogSurface, OverlayRenderer, RecordingSurface, Rgb, BADGE_OVERHANG, DEFAULT_BADGE_COLOR,
    FADE_IN, FADE_OUT_DELAY,
};
pub use render_state::{fingerprint, AvatarKey, RenderState};
pub use schema::parse_vote_frame;
pub use scope::{voting_area_avatars, AvatarElement, MAX_ANCESTOR_LEVELS, STORY_POINTS_HEADING};
pub use snapshot::{latest_snapshot, Vote, VoteSnapshot};
