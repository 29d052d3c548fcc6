//! Shape of the service's `voteForPokerStory` subscription payload. Owned by
//! the remote service; anything that deviates is treated as a non-match.

use peek_proto::Frame;
use serde::Deserialize;
use tracing::trace;

use crate::snapshot::{Vote, VoteSnapshot};

const VOTE_MARKER: &str = "VoteForPokerStory";
const VOTE_SUCCESS_TYPENAME: &str = "VoteForPokerStorySuccess";

#[derive(Debug, Deserialize)]
struct VoteEnvelope {
    payload: VotePayload,
}

#[derive(Debug, Deserialize)]
struct VotePayload {
    data: VoteData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteData {
    vote_for_poker_story: VoteForPokerStory,
}

#[derive(Debug, Deserialize)]
struct VoteForPokerStory {
    #[serde(rename = "__typename")]
    typename: String,
    stage: Stage,
}

#[derive(Debug, Deserialize)]
struct Stage {
    id: String,
    #[serde(default)]
    scores: Vec<Score>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Score {
    id: String,
    user_id: String,
    label: String,
    user: ScoreUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreUser {
    #[serde(default)]
    preferred_name: String,
    picture: String,
}

/// Extracts a vote snapshot from `frame`, or `None` when the frame is not a
/// successful vote update with at least one score.
pub fn parse_vote_frame(frame: &Frame) -> Option<VoteSnapshot> {
    if frame.is_binary() || !frame.payload().contains(VOTE_MARKER) {
        return None;
    }
    let envelope = match serde_json::from_str::<VoteEnvelope>(frame.payload()) {
        Ok(envelope) => envelope,
        Err(err) => {
            trace!(target = "overlay", frame_id = %frame.id(), error = %err, "frame is not a vote envelope");
            return None;
        }
    };
    let story = envelope.payload.data.vote_for_poker_story;
    if story.typename != VOTE_SUCCESS_TYPENAME || story.stage.scores.is_empty() {
        return None;
    }
    let votes = story
        .stage
        .scores
        .into_iter()
        .map(|score| Vote {
            voter_user_id: score.user_id,
            voter_name: score.user.preferred_name,
            voter_picture: score.user.picture,
            label: score.label,
            score_id: score.id,
        })
        .collect();
    Some(VoteSnapshot {
        frame_id: frame.id(),
        timestamp: frame.timestamp(),
        stage_id: story.stage.id,
        votes,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use peek_proto::{CapturedData, Direction, Frame};
    use serde_json::json;

    /// (user id, picture, label)
    pub fn vote_payload(stage: &str, scores: &[(&str, &str, &str)]) -> String {
        let scores: Vec<serde_json::Value> = scores
            .iter()
            .map(|(user, picture, label)| {
                json!({
                    "id": format!("{stage}:{user}"),
                    "userId": user,
                    "label": label,
                    "user": {"id": user, "preferredName": user.to_uppercase(), "picture": picture}
                })
            })
            .collect();
        json!({
            "type": "next",
            "id": "7",
            "payload": {"data": {"voteForPokerStory": {
                "__typename": "VoteForPokerStorySuccess",
                "stage": {"id": stage, "scores": scores}
            }}}
        })
        .to_string()
    }

    pub fn vote_frame(ts: i64, scores: &[(&str, &str, &str)]) -> Frame {
        text_frame(ts, &vote_payload("stage-1", scores))
    }

    pub fn text_frame(ts: i64, payload: &str) -> Frame {
        Frame::at(
            ts,
            Direction::Incoming,
            CapturedData::Text(payload),
            "wss://action.parabol.co/graphql",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn parses_successful_vote_updates() {
        let frame = vote_frame(100, &[("u1", "https://cdn/u1.png", "5")]);
        let snapshot = parse_vote_frame(&frame).expect("vote snapshot");
        assert_eq!(snapshot.timestamp, 100);
        assert_eq!(snapshot.stage_id, "stage-1");
        assert_eq!(snapshot.votes.len(), 1);
        let vote = &snapshot.votes[0];
        assert_eq!(vote.voter_user_id, "u1");
        assert_eq!(vote.voter_picture, "https://cdn/u1.png");
        assert_eq!(vote.label, "5");
        assert_eq!(vote.score_id, "stage-1:u1");
        assert_eq!(vote.voter_name, "U1");
    }

    #[test]
    fn rejects_malformed_and_foreign_payloads() {
        assert!(parse_vote_frame(&text_frame(1, "not json")).is_none());
        assert!(parse_vote_frame(&text_frame(1, r#"{"type":"ka"}"#)).is_none());
        assert!(parse_vote_frame(&text_frame(
            1,
            r#"{"payload":{"data":{"voteForPokerStory":null}}}"#
        ))
        .is_none());
        assert!(parse_vote_frame(&text_frame(1, "VoteForPokerStorySuccess but not json")).is_none());
    }

    #[test]
    fn rejects_empty_scores_and_error_typenames() {
        assert!(parse_vote_frame(&vote_frame(1, &[])).is_none());

        let errored = vote_payload("s", &[("u1", "p1", "3")])
            .replace("VoteForPokerStorySuccess", "VoteForPokerStoryError");
        assert!(parse_vote_frame(&text_frame(1, &errored)).is_none());
    }
}
