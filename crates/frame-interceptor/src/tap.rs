use std::collections::VecDeque;
use std::sync::Arc;

use context_bus::{publish_json, Bus, TOPIC_PAGE_BRIDGE};
use metrics::counter;
use parking_lot::Mutex;
use peek_proto::{BridgeMessage, Frame};
use tracing::{debug, trace};

/// Local capture queue flushed across the page bridge on every capture.
#[derive(Clone)]
pub struct FrameTap {
    bus: Arc<dyn Bus>,
    queue: Arc<Mutex<VecDeque<Frame>>>,
}

impl FrameTap {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Enqueues `frame` and drains the queue in FIFO order. The queue lock is
    /// held through the drain so concurrent captures cannot overtake each other.
    /// Never fails: frames that cannot cross the bridge are dropped.
    pub fn capture(&self, frame: Frame) {
        counter!(
            "poker_peek_frames_captured_total",
            1,
            "direction" => frame.direction().as_str()
        );
        let mut queue = self.queue.lock();
        queue.push_back(frame);
        while let Some(frame) = queue.pop_front() {
            self.post(frame);
        }
    }

    fn post(&self, frame: Frame) {
        let frame_id = frame.id();
        let message = BridgeMessage::WebsocketIntercept { payload: frame };
        match publish_json(self.bus.as_ref(), TOPIC_PAGE_BRIDGE, &message) {
            Ok(listeners) => {
                trace!(target = "interceptor", frame_id = %frame_id, listeners, "frame posted");
            }
            Err(err) => {
                counter!("poker_peek_frames_dropped_total", 1);
                debug!(
                    target = "interceptor",
                    frame_id = %frame_id,
                    error = %err,
                    "page bridge unavailable; frame dropped"
                );
            }
        }
    }
}
