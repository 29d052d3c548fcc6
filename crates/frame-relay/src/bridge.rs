use std::sync::Arc;

use context_bus::{Bus, BusMessage, TOPIC_PAGE_BRIDGE};
use peek_proto::BridgeMessage;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::service::RelayHandle;

/// Listens on the page bridge and forwards every `WEBSOCKET_INTERCEPT` post to
/// the relay as `FRAME_CAPTURED`, one at a time so capture order is kept.
/// Posts with any other shape are ignored.
pub fn spawn_page_bridge(bus: Arc<dyn Bus>, relay: RelayHandle) -> JoinHandle<()> {
    let mut rx = bus.subscribe(TOPIC_PAGE_BRIDGE);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => forward(&msg, &relay).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target = "relay.bridge", skipped, "page bridge lagged; frames lost");
                }
                Err(RecvError::Closed) => {
                    info!(target = "relay.bridge", "page bridge closed");
                    break;
                }
            }
        }
    })
}

async fn forward(msg: &BusMessage, relay: &RelayHandle) {
    let frame = match msg.decode::<BridgeMessage>() {
        Ok(BridgeMessage::WebsocketIntercept { payload }) => payload,
        Err(err) => {
            trace!(target = "relay.bridge", error = %err, "ignoring foreign page message");
            return;
        }
    };
    let frame_id = frame.id();
    if let Err(err) = relay.append(frame).await {
        warn!(
            target = "relay.bridge",
            frame_id = %frame_id,
            error = %err,
            "failed to hand frame to relay"
        );
    }
}
