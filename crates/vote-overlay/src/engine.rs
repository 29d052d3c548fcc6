use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use peek_proto::Frame;
use tracing::{debug, trace};

use crate::identity::SelfIdentityResolver;
use crate::page::{PageDocument, Rect};
use crate::render_state::{fingerprint, AvatarKey, RenderState};
use crate::scope::voting_area_avatars;
use crate::snapshot::{latest_snapshot, Vote};

/// Delay between consecutive badge insertions within one redraw.
pub const BADGE_STAGGER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeRequest {
    pub label: String,
    pub picture: String,
    pub voter_user_id: String,
    pub anchor: Rect,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayCommand {
    RemoveAllBadges,
    AddBadge(BadgeRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Disabled,
    NoSnapshot,
    Unchanged,
    Redrawn,
}

impl TickOutcome {
    fn as_str(self) -> &'static str {
        match self {
            TickOutcome::Disabled => "disabled",
            TickOutcome::NoSnapshot => "no_snapshot",
            TickOutcome::Unchanged => "unchanged",
            TickOutcome::Redrawn => "redrawn",
        }
    }
}

/// Decides what the overlay should show for the current frames and page.
pub struct CorrelationEngine {
    resolver: SelfIdentityResolver,
    state: Mutex<RenderState>,
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(SelfIdentityResolver::default())
    }
}

impl CorrelationEngine {
    pub fn new(resolver: SelfIdentityResolver) -> Self {
        Self {
            resolver,
            state: Mutex::new(RenderState::default()),
        }
    }

    pub fn state(&self) -> RenderState {
        self.state.lock().clone()
    }

    /// One evaluation pass. Returns an empty list when nothing needs to
    /// change; otherwise `RemoveAllBadges` followed by the badges to add.
    pub fn tick(&self, enabled: bool, frames: &[Frame], page: &PageDocument) -> Vec<OverlayCommand> {
        let (outcome, commands) = self.evaluate(enabled, frames, page);
        counter!("poker_peek_overlay_ticks_total", 1, "outcome" => outcome.as_str());
        trace!(
            target = "overlay",
            outcome = outcome.as_str(),
            commands = commands.len(),
            "overlay tick"
        );
        commands
    }

    fn evaluate(
        &self,
        enabled: bool,
        frames: &[Frame],
        page: &PageDocument,
    ) -> (TickOutcome, Vec<OverlayCommand>) {
        if !enabled {
            self.state.lock().reset();
            return (TickOutcome::Disabled, vec![OverlayCommand::RemoveAllBadges]);
        }

        let Some(snapshot) = latest_snapshot(frames) else {
            return (TickOutcome::NoSnapshot, Vec::new());
        };

        let self_picture = self.resolver.resolve(page).map(|identity| identity.picture);
        let candidates: Vec<&Vote> = snapshot
            .votes
            .iter()
            .filter(|vote| self_picture.as_deref() != Some(vote.voter_picture.as_str()))
            .collect();
        let avatars = voting_area_avatars(page);
        let avatar_keys: BTreeSet<AvatarKey> = avatars
            .iter()
            .map(|avatar| (avatar.picture.clone(), avatar.rect.is_some()))
            .collect();
        let digest = fingerprint(snapshot.timestamp, &candidates, self_picture.as_deref());
        let next = RenderState::new(digest, avatar_keys, self_picture.clone());

        {
            let mut state = self.state.lock();
            if *state == next {
                return (TickOutcome::Unchanged, Vec::new());
            }
            *state = next;
        }

        let mut votes: HashMap<&str, &Vote> = HashMap::new();
        for vote in candidates {
            votes.entry(vote.voter_picture.as_str()).or_insert(vote);
        }

        let mut commands = vec![OverlayCommand::RemoveAllBadges];
        for avatar in &avatars {
            let Some(vote) = votes.get(avatar.picture.as_str()) else {
                continue;
            };
            let Some(anchor) = avatar.rect else {
                trace!(target = "overlay", picture = %avatar.picture, "avatar not laid out; skipping badge");
                continue;
            };
            let index = (commands.len() - 1) as u32;
            commands.push(OverlayCommand::AddBadge(BadgeRequest {
                label: vote.label.clone(),
                picture: avatar.picture.clone(),
                voter_user_id: vote.voter_user_id.clone(),
                anchor,
                delay: BADGE_STAGGER * index,
            }));
        }

        debug!(
            target = "overlay",
            stage = %snapshot.stage_id,
            votes = snapshot.votes.len(),
            badges = commands.len() - 1,
            "redrawing vote badges"
        );
        (TickOutcome::Redrawn, commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ElementSpec;
    use crate::schema::fixtures::{text_frame, vote_frame};

    fn avatar(src: &str, x: f64) -> ElementSpec {
        ElementSpec::image(src, Rect::new(x, 100.0, 32.0, 32.0))
    }

    fn voting_page(avatars: Vec<ElementSpec>) -> PageDocument {
        let list = avatars.into_iter().fold(ElementSpec::new("div"), ElementSpec::child);
        let root = ElementSpec::new("body").child(
            ElementSpec::new("section")
                .child(ElementSpec::new("h2").text("Story Points"))
                .child(list),
        );
        PageDocument::from_spec(None, root)
    }

    fn badges(commands: &[OverlayCommand]) -> Vec<(&str, &str, Duration)> {
        commands
            .iter()
            .filter_map(|command| match command {
                OverlayCommand::AddBadge(req) => {
                    Some((req.picture.as_str(), req.label.as_str(), req.delay))
                }
                OverlayCommand::RemoveAllBadges => None,
            })
            .collect()
    }

    #[test]
    fn badges_every_voter_except_self() {
        let engine = CorrelationEngine::default();
        let page = voting_page(vec![
            avatar("p1", 0.0),
            avatar("p2", 50.0),
            avatar("p3", 100.0).attr("alt", "You"),
        ]);
        let frames = vec![vote_frame(
            10,
            &[("u1", "p1", "5"), ("u2", "p2", "8"), ("u3", "p3", "3")],
        )];

        let commands = engine.tick(true, &frames, &page);
        assert_eq!(commands[0], OverlayCommand::RemoveAllBadges);
        assert_eq!(
            badges(&commands),
            vec![
                ("p1", "5", Duration::ZERO),
                ("p2", "8", Duration::from_millis(100)),
            ]
        );
        assert_eq!(engine.state().self_picture(), Some("p3"));
    }

    #[test]
    fn unchanged_inputs_are_a_no_op() {
        let engine = CorrelationEngine::default();
        let page = voting_page(vec![avatar("p1", 0.0)]);
        let frames = vec![vote_frame(10, &[("u1", "p1", "5")])];

        assert_eq!(engine.tick(true, &frames, &page).len(), 2);
        assert!(engine.tick(true, &frames, &page).is_empty());
    }

    #[test]
    fn newer_frame_redraws() {
        let engine = CorrelationEngine::default();
        let page = voting_page(vec![avatar("p1", 0.0)]);
        let mut frames = vec![vote_frame(10, &[("u1", "p1", "5")])];
        engine.tick(true, &frames, &page);

        frames.push(vote_frame(20, &[("u1", "p1", "13")]));
        let commands = engine.tick(true, &frames, &page);
        assert_eq!(badges(&commands), vec![("p1", "13", Duration::ZERO)]);
    }

    #[test]
    fn avatar_set_change_redraws() {
        let engine = CorrelationEngine::default();
        let frames = vec![vote_frame(10, &[("u1", "p1", "5"), ("u2", "p2", "8")])];
        engine.tick(true, &frames, &voting_page(vec![avatar("p1", 0.0)]));

        let commands = engine.tick(
            true,
            &frames,
            &voting_page(vec![avatar("p1", 0.0), avatar("p2", 40.0)]),
        );
        assert_eq!(badges(&commands).len(), 2);
    }

    #[test]
    fn no_snapshot_leaves_overlay_alone() {
        let engine = CorrelationEngine::default();
        let page = voting_page(vec![avatar("p1", 0.0)]);
        assert!(engine.tick(true, &[], &page).is_empty());
        assert!(engine
            .tick(true, &[text_frame(1, "{\"type\":\"ka\"}")], &page)
            .is_empty());
        assert!(!engine.state().is_rendered());
    }

    #[test]
    fn disabled_removes_badges_and_forces_redraw_on_enable() {
        let engine = CorrelationEngine::default();
        let page = voting_page(vec![avatar("p1", 0.0)]);
        let frames = vec![vote_frame(10, &[("u1", "p1", "5")])];
        engine.tick(true, &frames, &page);

        assert_eq!(
            engine.tick(false, &frames, &page),
            vec![OverlayCommand::RemoveAllBadges]
        );
        assert_eq!(
            engine.tick(false, &frames, &page),
            vec![OverlayCommand::RemoveAllBadges]
        );
        assert_eq!(badges(&engine.tick(true, &frames, &page)).len(), 1);
    }

    #[test]
    fn avatar_laid_out_later_gets_its_badge() {
        let engine = CorrelationEngine::default();
        let frames = vec![vote_frame(10, &[("u1", "p1", "5")])];

        let hidden = voting_page(vec![ElementSpec::new("img").attr("src", "p1")]);
        assert_eq!(
            engine.tick(true, &frames, &hidden),
            vec![OverlayCommand::RemoveAllBadges]
        );

        let shown = voting_page(vec![avatar("p1", 0.0)]);
        let commands = engine.tick(true, &frames, &shown);
        assert_eq!(badges(&commands), vec![("p1", "5", Duration::ZERO)]);
        assert!(engine.tick(true, &frames, &shown).is_empty());
    }

    #[test]
    fn own_vote_changing_does_not_redraw() {
        let engine = CorrelationEngine::default();
        let page = voting_page(vec![avatar("p1", 0.0), avatar("p3", 40.0).attr("alt", "You")]);
        let before = vec![vote_frame(10, &[("u1", "p1", "5"), ("u3", "p3", "3")])];
        assert_eq!(badges(&engine.tick(true, &before, &page)).len(), 1);

        let after = vec![vote_frame(10, &[("u1", "p1", "5"), ("u3", "p3", "8")])];
        assert!(engine.tick(true, &after, &page).is_empty());
    }

    #[test]
    fn voters_without_avatars_and_hidden_avatars_get_nothing() {
        let engine = CorrelationEngine::default();
        let page = voting_page(vec![
            avatar("p1", 0.0),
            ElementSpec::new("img").attr("src", "p2"),
            avatar("stranger", 80.0),
        ]);
        let frames = vec![vote_frame(
            10,
            &[("u1", "p1", "5"), ("u2", "p2", "8"), ("u9", "p9", "1")],
        )];
        let commands = engine.tick(true, &frames, &page);
        assert_eq!(badges(&commands), vec![("p1", "5", Duration::ZERO)]);
    }
}
