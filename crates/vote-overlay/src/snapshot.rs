use peek_proto::Frame;
use uuid::Uuid;

use crate::schema::parse_vote_frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub voter_user_id: String,
    pub voter_name: String,
    pub voter_picture: String,
    pub label: String,
    pub score_id: String,
}

/// Most recent complete vote-stage state seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSnapshot {
    pub frame_id: Uuid,
    pub timestamp: i64,
    pub stage_id: String,
    pub votes: Vec<Vote>,
}

/// Picks the qualifying frame with the greatest capture timestamp. On equal
/// timestamps the frame scanned last wins.
pub fn latest_snapshot(frames: &[Frame]) -> Option<VoteSnapshot> {
    frames
        .iter()
        .filter_map(parse_vote_frame)
        .fold(None, |best: Option<VoteSnapshot>, candidate| match best {
            Some(current) if current.timestamp > candidate.timestamp => Some(current),
            _ => Some(candidate),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::{text_frame, vote_frame};

    #[test]
    fn latest_timestamp_wins_regardless_of_order() {
        let frames = vec![
            vote_frame(200, &[("u1", "p1", "8"), ("u2", "p2", "3")]),
            vote_frame(100, &[("u1", "p1", "5")]),
            text_frame(300, "not json"),
        ];
        let snapshot = latest_snapshot(&frames).expect("snapshot");
        assert_eq!(snapshot.timestamp, 200);
        assert_eq!(snapshot.votes.len(), 2);
    }

    #[test]
    fn ties_go_to_the_last_frame_scanned() {
        let frames = vec![
            vote_frame(100, &[("u1", "p1", "1")]),
            vote_frame(100, &[("u1", "p1", "2")]),
        ];
        let snapshot = latest_snapshot(&frames).expect("snapshot");
        assert_eq!(snapshot.votes[0].label, "2");
    }

    #[test]
    fn no_qualifying_frames_means_no_snapshot() {
        let frames = vec![text_frame(1, "not json"), text_frame(2, r#"{"a":1}"#)];
        assert!(latest_snapshot(&frames).is_none());
        assert!(latest_snapshot(&[]).is_none());
    }
}
