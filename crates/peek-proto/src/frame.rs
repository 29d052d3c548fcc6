use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stand-in payload for binary frames; they are never parsed.
pub const BINARY_PLACEHOLDER: &str = "[Binary data]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

/// Data observed on a channel, before it is turned into a frame payload.
#[derive(Debug, Clone, Copy)]
pub enum CapturedData<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

/// One observed transport-level event. Fields are private so a frame cannot
/// change after capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    id: Uuid,
    timestamp: i64,
    direction: Direction,
    payload: String,
    source_url: String,
}

impl Frame {
    /// Builds a frame stamped with a fresh id and the current wall clock.
    pub fn capture(direction: Direction, data: CapturedData<'_>, source_url: &str) -> Self {
        Self::at(now_millis(), direction, data, source_url)
    }

    /// Builds a frame with an explicit capture time (replays, tests).
    pub fn at(
        timestamp: i64,
        direction: Direction,
        data: CapturedData<'_>,
        source_url: &str,
    ) -> Self {
        let payload = match data {
            CapturedData::Text(text) => text.to_string(),
            CapturedData::Binary(_) => BINARY_PLACEHOLDER.to_string(),
        };
        Self {
            id: Uuid::new_v4(),
            timestamp,
            direction,
            payload,
            source_url: source_url.to_string(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn is_binary(&self) -> bool {
        self.payload == BINARY_PLACEHOLDER
    }
}

/// Milliseconds since the Unix epoch; clamps to zero if the clock is before it.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
