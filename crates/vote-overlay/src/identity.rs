//! Self-identity resolution: which avatar picture belongs to the viewer.
//!
//! Matchers run in a fixed priority order and the first hit wins. None of
//! them is authoritative; they are heuristics over what the page exposes.

use tracing::trace;

use crate::page::{Element, ElementId, PageDocument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIdentity {
    pub picture: String,
    /// Name of the matcher that produced this identity.
    pub matcher: &'static str,
}

pub trait IdentityMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Picture URL of the viewer's own avatar, if this heuristic finds one.
    fn resolve(&self, page: &PageDocument) -> Option<String>;
}

const SELF_WORDS: &[&str] = &["you", "me", "current"];
const SELF_ATTRIBUTES: &[&str] = &["data-current-user", "data-is-self", "data-self", "data-viewer"];
const SELF_TEST_IDS: &[&str] = &["current-user", "viewer-avatar", "my-avatar", "self-avatar"];
const SELF_CLASS_MARKERS: &[&str] = &["self", "current-user", "currentuser", "viewer", "is-me"];
const DISTINGUISHING_STYLES: &[&str] = &["border", "outline", "box-shadow"];
const USER_MENU_MARKERS: &[&str] = &["user-menu", "usermenu", "profile", "account", "avatar-menu"];
const ATTRIBUTE_SEARCH_DEPTH: usize = 3;

fn avatar_pictures(page: &PageDocument) -> impl Iterator<Item = (ElementId, &Element, &str)> {
    page.images().into_iter().filter_map(move |id| {
        let element = page.element(id)?;
        Some((id, element, element.image_src()?))
    })
}

fn contains_word(text: &str, words: &[&str]) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| words.iter().any(|word| token.eq_ignore_ascii_case(word)))
}

/// Avatar whose alt text (or accessible label) names the viewer, e.g. "You".
#[derive(Debug, Default, Clone, Copy)]
pub struct AltTextMatcher;

impl IdentityMatcher for AltTextMatcher {
    fn name(&self) -> &'static str {
        "alt-text"
    }

    fn resolve(&self, page: &PageDocument) -> Option<String> {
        avatar_pictures(page)
            .find(|(_, element, _)| {
                ["alt", "aria-label", "title"]
                    .iter()
                    .filter_map(|attr| element.attr(attr))
                    .any(|text| contains_word(text, SELF_WORDS))
            })
            .map(|(_, _, picture)| picture.to_string())
    }
}

/// Avatar marked with an authenticated-user attribute on itself or a close
/// ancestor.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthenticatedUserMatcher;

impl AuthenticatedUserMatcher {
    fn marks_self(element: &Element) -> bool {
        let flagged = SELF_ATTRIBUTES.iter().any(|attr| {
            element
                .attr(attr)
                .map(|value| value.is_empty() || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        });
        let test_id = element
            .attr("data-testid")
            .map(|value| {
                let value = value.to_ascii_lowercase();
                SELF_TEST_IDS.iter().any(|marker| value.contains(marker))
            })
            .unwrap_or(false);
        flagged || test_id
    }
}

impl IdentityMatcher for AuthenticatedUserMatcher {
    fn name(&self) -> &'static str {
        "authenticated-user"
    }

    fn resolve(&self, page: &PageDocument) -> Option<String> {
        avatar_pictures(page)
            .find(|(id, element, _)| {
                Self::marks_self(element)
                    || page
                        .ancestors(*id)
                        .take(ATTRIBUTE_SEARCH_DEPTH)
                        .filter_map(|ancestor| page.element(ancestor))
                        .any(Self::marks_self)
            })
            .map(|(_, _, picture)| picture.to_string())
    }
}

/// Avatar styled differently from its peers: a self-marking class, or the
/// only avatar carrying a border/outline/shadow.
#[derive(Debug, Default, Clone, Copy)]
pub struct DistinguishedAvatarMatcher;

impl IdentityMatcher for DistinguishedAvatarMatcher {
    fn name(&self) -> &'static str {
        "distinguished-avatar"
    }

    fn resolve(&self, page: &PageDocument) -> Option<String> {
        let avatars: Vec<_> = avatar_pictures(page).collect();
        let by_class = avatars.iter().find(|(_, element, _)| {
            element.classes().any(|class| {
                let class = class.to_ascii_lowercase();
                SELF_CLASS_MARKERS.iter().any(|marker| {
                    class == *marker
                        || class.ends_with(&format!("--{marker}"))
                        || class.ends_with(&format!("-{marker}"))
                })
            })
        });
        if let Some((_, _, picture)) = by_class {
            return Some(picture.to_string());
        }

        let styled: Vec<_> = avatars
            .iter()
            .filter(|(_, element, _)| {
                element
                    .attr("style")
                    .map(|style| {
                        let style = style.to_ascii_lowercase();
                        DISTINGUISHING_STYLES.iter().any(|prop| style.contains(prop))
                    })
                    .unwrap_or(false)
            })
            .collect();
        match styled.as_slice() {
            [(_, _, picture)] if avatars.len() > 1 => Some(picture.to_string()),
            _ => None,
        }
    }
}

/// First avatar inside the user menu / profile area of the page chrome.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserMenuMatcher;

impl UserMenuMatcher {
    fn is_menu(element: &Element) -> bool {
        let markers = ["id", "class", "aria-label", "data-testid"]
            .iter()
            .filter_map(|attr| element.attr(attr))
            .map(str::to_ascii_lowercase)
            .any(|value| USER_MENU_MARKERS.iter().any(|marker| value.contains(marker)));
        markers || (element.tag() == "button" && element.attr("aria-haspopup").is_some())
    }
}

impl IdentityMatcher for UserMenuMatcher {
    fn name(&self) -> &'static str {
        "user-menu"
    }

    fn resolve(&self, page: &PageDocument) -> Option<String> {
        avatar_pictures(page)
            .find(|(id, _, _)| {
                page.ancestors(*id)
                    .filter_map(|ancestor| page.element(ancestor))
                    .any(Self::is_menu)
            })
            .map(|(_, _, picture)| picture.to_string())
    }
}

pub struct SelfIdentityResolver {
    matchers: Vec<Box<dyn IdentityMatcher>>,
}

impl Default for SelfIdentityResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(AltTextMatcher),
            Box::new(AuthenticatedUserMatcher),
            Box::new(DistinguishedAvatarMatcher),
            Box::new(UserMenuMatcher),
        ])
    }
}

impl SelfIdentityResolver {
    pub fn new(matchers: Vec<Box<dyn IdentityMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn resolve(&self, page: &PageDocument) -> Option<SelfIdentity> {
        for matcher in &self.matchers {
            if let Some(picture) = matcher.resolve(page) {
                trace!(target = "overlay", matcher = matcher.name(), %picture, "resolved self identity");
                return Some(SelfIdentity {
                    picture,
                    matcher: matcher.name(),
                });
            }
        }
        None
    }
}
