use std::collections::BTreeSet;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::snapshot::Vote;

#[derive(Serialize)]
struct FingerprintInput<'a> {
    timestamp: i64,
    votes: Vec<(&'a str, &'a str, &'a str)>,
    self_picture: Option<&'a str>,
}

/// Stable digest of the candidate votes (picture, label, score id), the
/// snapshot timestamp and the viewer's picture. `candidates` already excludes
/// the viewer's own vote.
pub fn fingerprint(timestamp: i64, candidates: &[&Vote], self_picture: Option<&str>) -> String {
    let input = FingerprintInput {
        timestamp,
        votes: candidates
            .iter()
            .map(|vote| {
                (
                    vote.voter_picture.as_str(),
                    vote.label.as_str(),
                    vote.score_id.as_str(),
                )
            })
            .collect(),
        self_picture,
    };
    let mut hasher = Sha256::new();
    // serializing borrowed strings and integers cannot fail
    if let Ok(encoded) = serde_json::to_vec(&input) {
        hasher.update(&encoded);
    }
    hex::encode(hasher.finalize())
}

/// Avatar picture plus whether it had a layout box, so an avatar that gets
/// laid out later counts as a change.
pub type AvatarKey = (String, bool);

/// What the overlay last drew. A tick whose inputs all match is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderState {
    fingerprint: Option<String>,
    avatars: BTreeSet<AvatarKey>,
    self_picture: Option<String>,
}

impl RenderState {
    pub fn new(
        fingerprint: String,
        avatars: BTreeSet<AvatarKey>,
        self_picture: Option<String>,
    ) -> Self {
        Self {
            fingerprint: Some(fingerprint),
            avatars,
            self_picture,
        }
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn avatars(&self) -> &BTreeSet<AvatarKey> {
        &self.avatars
    }

    pub fn self_picture(&self) -> Option<&str> {
        self.self_picture.as_deref()
    }

    pub fn is_rendered(&self) -> bool {
        self.fingerprint.is_some()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
