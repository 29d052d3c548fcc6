use serde::{Deserialize, Serialize};

use crate::Frame;

/// Requests understood by the background relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayRequest {
    FrameCaptured { payload: Frame },
    GetFrames,
    ClearFrames,
}

impl RelayRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayRequest::FrameCaptured { .. } => "FRAME_CAPTURED",
            RelayRequest::GetFrames => "GET_FRAMES",
            RelayRequest::ClearFrames => "CLEAR_FRAMES",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramesResponse {
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayResponse {
    Frames(FramesResponse),
    Ack(AckResponse),
}

impl RelayResponse {
    pub fn ack() -> Self {
        RelayResponse::Ack(AckResponse { success: true })
    }

    pub fn frames(frames: Vec<Frame>) -> Self {
        RelayResponse::Frames(FramesResponse { frames })
    }
}

/// Fire-and-forget notifications fanned out to every interested listener.
/// These never share a topic with captured frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    ToggleChanged { enabled: bool },
}

/// Page-context post to the content context (`window.postMessage` shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "WEBSOCKET_INTERCEPT")]
    WebsocketIntercept { payload: Frame },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CapturedData, Direction};

    fn sample_frame() -> Frame {
        Frame::at(
            7,
            Direction::Outgoing,
            CapturedData::Text("ping"),
            "wss://action.parabol.co/graphql",
        )
    }

    #[test]
    fn relay_requests_use_screaming_type_tags() {
        let value = serde_json::to_value(RelayRequest::GetFrames).expect("serialize");
        assert_eq!(value, serde_json::json!({"type": "GET_FRAMES"}));

        let captured = RelayRequest::FrameCaptured {
            payload: sample_frame(),
        };
        let value = serde_json::to_value(&captured).expect("serialize");
        assert_eq!(value["type"], "FRAME_CAPTURED");
        assert_eq!(value["payload"]["payload"], "ping");

        let parsed: RelayRequest =
            serde_json::from_str(r#"{"type":"CLEAR_FRAMES"}"#).expect("parse clear");
        assert_eq!(parsed, RelayRequest::ClearFrames);
    }

    #[test]
    fn responses_match_relay_shapes() {
        let ack = serde_json::to_value(RelayResponse::ack()).expect("serialize");
        assert_eq!(ack, serde_json::json!({"success": true}));

        let frames = serde_json::to_value(RelayResponse::frames(vec![sample_frame()]))
            .expect("serialize");
        assert_eq!(frames["frames"].as_array().map(Vec::len), Some(1));

        let parsed: RelayResponse =
            serde_json::from_str(r#"{"frames":[]}"#).expect("parse frames response");
        assert_eq!(parsed, RelayResponse::frames(Vec::new()));
    }

    #[test]
    fn toggle_and_bridge_tags() {
        let toggle = serde_json::to_value(ControlMessage::ToggleChanged { enabled: false })
            .expect("serialize");
        assert_eq!(
            toggle,
            serde_json::json!({"type": "TOGGLE_CHANGED", "enabled": false})
        );

        let bridge = serde_json::to_value(BridgeMessage::WebsocketIntercept {
            payload: sample_frame(),
        })
        .expect("serialize");
        assert_eq!(bridge["type"], "WEBSOCKET_INTERCEPT");

        let foreign = serde_json::from_str::<BridgeMessage>(r#"{"type":"SOMETHING_ELSE"}"#);
        assert!(foreign.is_err());
    }
}
