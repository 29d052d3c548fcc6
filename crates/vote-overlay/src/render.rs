//! Visual layer: badges inserted over avatars, faded out on removal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::engine::{BadgeRequest, OverlayCommand};

/// Badges leaving the page stay attached this long so the fade can finish.
pub const FADE_OUT_DELAY: Duration = Duration::from_millis(300);
pub const FADE_IN: Duration = Duration::from_millis(200);
/// How far the badge overflows the avatar's top-right corner.
pub const BADGE_OVERHANG: f64 = 6.0;
pub const DEFAULT_BADGE_COLOR: Rgb = Rgb {
    r: 0x63,
    g: 0x66,
    b: 0xF1,
};

const COLOR_QUERY_KEYS: &[&str] = &["backgroundColor", "background"];
const LIGHT_TEXT: Rgb = Rgb {
    r: 0xFF,
    g: 0xFF,
    b: 0xFF,
};
const DARK_TEXT: Rgb = Rgb {
    r: 0x11,
    g: 0x18,
    b: 0x27,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Accepts `#rgb`, `#rrggbb` and the same without `#`.
    pub fn parse_hex(raw: &str) -> Option<Self> {
        let hex = raw.trim().trim_start_matches('#');
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let expand = |idx: usize| channel(&hex[idx..idx + 1].repeat(2));
                Some(Self {
                    r: expand(0)?,
                    g: expand(1)?,
                    b: expand(2)?,
                })
            }
            6 => Some(Self {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
            }),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Perceived brightness in `0.0..=1.0`.
pub fn luminance(color: Rgb) -> f64 {
    (0.299 * f64::from(color.r) + 0.587 * f64::from(color.g) + 0.114 * f64::from(color.b))
        / 255.0
}

/// Background color encoded in an avatar URL's query string, if any.
pub fn picture_color(picture: &str) -> Option<Rgb> {
    let (_, query) = picture.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| {
            let key: &str = key;
            COLOR_QUERY_KEYS.contains(&key)
        })
        .and_then(|(_, value)| value.split(',').find_map(Rgb::parse_hex))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadgePalette {
    pub background: Rgb,
    pub foreground: Rgb,
}

pub fn badge_palette(picture: &str) -> BadgePalette {
    let background = picture_color(picture).unwrap_or(DEFAULT_BADGE_COLOR);
    let foreground = if luminance(background) > 0.5 {
        DARK_TEXT
    } else {
        LIGHT_TEXT
    };
    BadgePalette {
        background,
        foreground,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BadgeId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct Badge {
    pub id: BadgeId,
    pub label: String,
    pub picture: String,
    pub voter_user_id: String,
    /// Top-left corner in page coordinates.
    pub x: f64,
    pub y: f64,
    pub palette: BadgePalette,
    pub fade_in: Duration,
}

/// Where badges are drawn. Implementations only mutate their own badges.
pub trait BadgeSurface: Send + Sync {
    fn insert(&self, badge: Badge);

    /// Starts fading every attached badge and returns their ids.
    fn begin_fade_out(&self) -> Vec<BadgeId>;

    fn detach(&self, ids: &[BadgeId]);
}

/// Applies overlay commands to a surface. Must be used inside a Tokio
/// runtime: staggered inserts and fade-out detaches run as tasks.
#[derive(Clone)]
pub struct OverlayRenderer {
    surface: Arc<dyn BadgeSurface>,
    generation: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
}

impl OverlayRenderer {
    pub fn new(surface: Arc<dyn BadgeSurface>) -> Self {
        Self {
            surface,
            generation: Arc::new(AtomicU64::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn apply(&self, commands: Vec<OverlayCommand>) {
        for command in commands {
            match command {
                OverlayCommand::RemoveAllBadges => self.remove_all(),
                OverlayCommand::AddBadge(request) => self.add(request),
            }
        }
    }

    fn remove_all(&self) {
        // pending staggered inserts from the previous draw must not land
        self.generation.fetch_add(1, Ordering::SeqCst);
        let ids = self.surface.begin_fade_out();
        if ids.is_empty() {
            return;
        }
        let surface = Arc::clone(&self.surface);
        tokio::spawn(async move {
            tokio::time::sleep(FADE_OUT_DELAY).await;
            surface.detach(&ids);
        });
    }

    fn add(&self, request: BadgeRequest) {
        let badge = Badge {
            id: BadgeId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            palette: badge_palette(&request.picture),
            x: request.anchor.right() - BADGE_OVERHANG,
            y: request.anchor.y - BADGE_OVERHANG,
            label: request.label,
            picture: request.picture,
            voter_user_id: request.voter_user_id,
            fade_in: FADE_IN,
        };
        let generation = self.generation.load(Ordering::SeqCst);
        if request.delay.is_zero() {
            insert(self.surface.as_ref(), badge);
            return;
        }
        let surface = Arc::clone(&self.surface);
        let current = Arc::clone(&self.generation);
        tokio::spawn(async move {
            tokio::time::sleep(request.delay).await;
            if current.load(Ordering::SeqCst) == generation {
                insert(surface.as_ref(), badge);
            } else {
                debug!(target = "overlay.render", badge = badge.id.0, "dropping superseded badge");
            }
        });
    }
}

fn insert(surface: &dyn BadgeSurface, badge: Badge) {
    counter!("poker_peek_badges_added_total", 1);
    surface.insert(badge);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgePhase {
    Visible,
    FadingOut,
}

/// In-memory surface that records badges and their phase.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    badges: Mutex<Vec<(Badge, BadgePhase)>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> Vec<Badge> {
        self.badges
            .lock()
            .iter()
            .filter(|(_, phase)| *phase == BadgePhase::Visible)
            .map(|(badge, _)| badge.clone())
            .collect()
    }

    pub fn fading(&self) -> usize {
        self.badges
            .lock()
            .iter()
            .filter(|(_, phase)| *phase == BadgePhase::FadingOut)
            .count()
    }

    /// Labels of visible badges keyed by picture, in insertion order.
    pub fn labels(&self) -> Vec<(String, String)> {
        self.visible()
            .into_iter()
            .map(|badge| (badge.picture, badge.label))
            .collect()
    }

    pub fn attached(&self) -> usize {
        self.badges.lock().len()
    }
}

impl BadgeSurface for RecordingSurface {
    fn insert(&self, badge: Badge) {
        self.badges.lock().push((badge, BadgePhase::Visible));
    }

    fn begin_fade_out(&self) -> Vec<BadgeId> {
        let mut badges = self.badges.lock();
        badges
            .iter_mut()
            .filter(|(_, phase)| *phase == BadgePhase::Visible)
            .map(|(badge, phase)| {
                *phase = BadgePhase::FadingOut;
                badge.id
            })
            .collect()
    }

    fn detach(&self, ids: &[BadgeId]) {
        self.badges.lock().retain(|(badge, _)| !ids.contains(&badge.id));
    }
}

/// Surface that reports badge changes through tracing; used by the CLI.
#[derive(Debug, Default)]
pub struct LogSurface {
    live: Mutex<Vec<BadgeId>>,
}

impl LogSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BadgeSurface for LogSurface {
    fn insert(&self, badge: Badge) {
        info!(
            target = "overlay.render",
            voter = %badge.voter_user_id,
            label = %badge.label,
            picture = %badge.picture,
            x = badge.x,
            y = badge.y,
            background = %badge.palette.background.to_hex(),
            "badge shown"
        );
        self.live.lock().push(badge.id);
    }

    fn begin_fade_out(&self) -> Vec<BadgeId> {
        let ids = self.live.lock().clone();
        if !ids.is_empty() {
            info!(target = "overlay.render", count = ids.len(), "badges fading out");
        }
        ids
    }

    fn detach(&self, ids: &[BadgeId]) {
        self.live.lock().retain(|id| !ids.contains(id));
        debug!(target = "overlay.render", count = ids.len(), "badges detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Rect;

    fn request(picture: &str, label: &str, delay_ms: u64) -> OverlayCommand {
        OverlayCommand::AddBadge(BadgeRequest {
            label: label.into(),
            picture: picture.into(),
            voter_user_id: format!("user-{picture}"),
            anchor: Rect::new(100.0, 200.0, 40.0, 40.0),
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(
            Rgb::parse_hex("#fff"),
            Some(Rgb {
                r: 255,
                g: 255,
                b: 255
            })
        );
        assert_eq!(Rgb::parse_hex("6366f1"), Some(DEFAULT_BADGE_COLOR));
        assert_eq!(Rgb::parse_hex("#12345"), None);
        assert_eq!(Rgb::parse_hex("zzzzzz"), None);
        assert_eq!(DEFAULT_BADGE_COLOR.to_hex(), "#6366F1");
    }

    #[test]
    fn palette_follows_picture_color_and_luminance() {
        let light = badge_palette("https://avatars.example/a.svg?seed=x&backgroundColor=ffd5dc,c0aede");
        assert_eq!(light.background.to_hex(), "#FFD5DC");
        assert_eq!(light.foreground, DARK_TEXT);

        let dark = badge_palette("https://avatars.example/a.svg?background=%23101010");
        assert_eq!(dark.background.to_hex(), "#101010");
        assert_eq!(dark.foreground, LIGHT_TEXT);

        let fallback = badge_palette("https://cdn.example/a.png");
        assert_eq!(fallback.background, DEFAULT_BADGE_COLOR);
        assert_eq!(fallback.foreground, LIGHT_TEXT);
    }

    #[test]
    fn luminance_bounds() {
        assert_eq!(luminance(Rgb { r: 0, g: 0, b: 0 }), 0.0);
        assert!((luminance(LIGHT_TEXT) - 1.0).abs() < 1e-9);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn staggered_badges_land_in_order() {
        let surface = Arc::new(RecordingSurface::new());
        let renderer = OverlayRenderer::new(surface.clone());
        renderer.apply(vec![
            OverlayCommand::RemoveAllBadges,
            request("p1", "5", 0),
            request("p2", "8", 100),
        ]);
        assert_eq!(surface.labels(), vec![("p1".to_string(), "5".to_string())]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(surface.visible().len(), 2);
        let first = &surface.visible()[0];
        assert_eq!((first.x, first.y), (134.0, 194.0));
        assert_eq!(first.fade_in, FADE_IN);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn removal_fades_then_detaches() {
        let surface = Arc::new(RecordingSurface::new());
        let renderer = OverlayRenderer::new(surface.clone());
        renderer.apply(vec![request("p1", "5", 0), request("p2", "3", 0)]);
        renderer.apply(vec![OverlayCommand::RemoveAllBadges]);

        assert!(surface.visible().is_empty());
        assert_eq!(surface.fading(), 2);

        tokio::time::sleep(FADE_OUT_DELAY + Duration::from_millis(10)).await;
        assert_eq!(surface.attached(), 0);
    }

    #[test_timeout::tokio_timeout_test(5, paused)]
    async fn superseded_inserts_are_dropped() {
        let surface = Arc::new(RecordingSurface::new());
        let renderer = OverlayRenderer::new(surface.clone());
        renderer.apply(vec![
            OverlayCommand::RemoveAllBadges,
            request("p1", "1", 0),
            request("p2", "2", 100),
            request("p3", "3", 200),
        ]);
        renderer.apply(vec![OverlayCommand::RemoveAllBadges, request("p1", "13", 0)]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(surface.labels(), vec![("p1".to_string(), "13".to_string())]);
        assert_eq!(surface.attached(), 1);
    }
}
