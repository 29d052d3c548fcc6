use std::sync::Arc;

use peek_proto::{Frame, FramesResponse, RelayRequest, RelayResponse};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::BoundedFrameStore;

const RELAY_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay context disconnected")]
    Disconnected,
    #[error("unexpected relay response to {0}")]
    UnexpectedResponse(&'static str),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Request handler of the background context.
#[derive(Clone)]
pub struct RelayService {
    store: Arc<BoundedFrameStore>,
}

impl RelayService {
    pub fn new(store: Arc<BoundedFrameStore>) -> Self {
        Self { store }
    }

    pub fn handle(&self, request: RelayRequest) -> RelayResponse {
        match request {
            RelayRequest::FrameCaptured { payload } => {
                let evicted = self.store.append(payload);
                if evicted > 0 {
                    debug!(target = "relay", evicted, "frame store at capacity");
                }
                RelayResponse::ack()
            }
            RelayRequest::GetFrames => RelayResponse::frames(self.store.read_all()),
            RelayRequest::ClearFrames => {
                let cleared = self.store.clear();
                info!(target = "relay", cleared, "frame store cleared");
                RelayResponse::ack()
            }
        }
    }
}

type Envelope = (RelayRequest, oneshot::Sender<RelayResponse>);

/// Cloneable client side of the relay. Every call is a fallible round trip:
/// once the background task is gone, calls fail with [`RelayError::Disconnected`].
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<Envelope>,
}

impl RelayHandle {
    pub async fn send(&self, request: RelayRequest) -> RelayResult<RelayResponse> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| RelayError::Disconnected)?;
        reply_rx.await.map_err(|_| RelayError::Disconnected)
    }

    pub async fn append(&self, frame: Frame) -> RelayResult<()> {
        match self.send(RelayRequest::FrameCaptured { payload: frame }).await? {
            RelayResponse::Ack(_) => Ok(()),
            RelayResponse::Frames(_) => Err(RelayError::UnexpectedResponse("FRAME_CAPTURED")),
        }
    }

    pub async fn read_all(&self) -> RelayResult<Vec<Frame>> {
        match self.send(RelayRequest::GetFrames).await? {
            RelayResponse::Frames(FramesResponse { frames }) => Ok(frames),
            RelayResponse::Ack(_) => Err(RelayError::UnexpectedResponse("GET_FRAMES")),
        }
    }

    pub async fn clear(&self) -> RelayResult<()> {
        match self.send(RelayRequest::ClearFrames).await? {
            RelayResponse::Ack(_) => Ok(()),
            RelayResponse::Frames(_) => Err(RelayError::UnexpectedResponse("CLEAR_FRAMES")),
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Runs the relay service on its own task. Requests are handled one at a
/// time, so the store is only ever mutated from this task's handler.
pub fn spawn_relay(store: Arc<BoundedFrameStore>) -> (RelayHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(RELAY_QUEUE_DEPTH);
    let service = RelayService::new(store);
    let task = tokio::spawn(async move {
        while let Some((request, reply)) = rx.recv().await {
            let kind = request.kind();
            let response = service.handle(request);
            if reply.send(response).is_err() {
                debug!(target = "relay", kind, "requester went away before the reply");
            }
        }
        debug!(target = "relay", "relay service stopped");
    });
    (RelayHandle { tx }, task)
}
