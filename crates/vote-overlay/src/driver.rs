use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use context_bus::{Bus, TOPIC_RUNTIME_CONTROL};
use frame_relay::{BoundedFrameStore, RelayHandle, RelayResult};
use peek_proto::{ControlMessage, Frame};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::CorrelationEngine;
use crate::page::PageSource;
use crate::render::OverlayRenderer;

pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Where the overlay reads captured frames from.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn frames(&self) -> RelayResult<Vec<Frame>>;
}

#[async_trait]
impl FrameSource for RelayHandle {
    async fn frames(&self) -> RelayResult<Vec<Frame>> {
        self.read_all().await
    }
}

#[async_trait]
impl FrameSource for BoundedFrameStore {
    async fn frames(&self) -> RelayResult<Vec<Frame>> {
        Ok(self.read_all())
    }
}

/// Periodic driver: every interval (and on toggle changes) reads frames,
/// asks the engine what changed and hands the commands to the renderer.
pub struct OverlayLoop {
    engine: Arc<CorrelationEngine>,
    frames: Arc<dyn FrameSource>,
    page: Arc<dyn PageSource>,
    renderer: OverlayRenderer,
    period: Duration,
    enabled: bool,
}

impl OverlayLoop {
    pub fn new(
        engine: Arc<CorrelationEngine>,
        frames: Arc<dyn FrameSource>,
        page: Arc<dyn PageSource>,
        renderer: OverlayRenderer,
        enabled: bool,
    ) -> Self {
        Self {
            engine,
            frames,
            page,
            renderer,
            period: POLL_INTERVAL,
            enabled,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Runs one evaluation pass. A relay failure skips the tick.
    pub async fn run_once(&self) {
        let frames = if self.enabled {
            match self.frames.frames().await {
                Ok(frames) => frames,
                Err(err) => {
                    warn!(target = "overlay", error = %err, "failed to read captured frames; skipping tick");
                    return;
                }
            }
        } else {
            Vec::new()
        };
        let page = self.page.snapshot();
        let commands = self.engine.tick(self.enabled, &frames, &page);
        if !commands.is_empty() {
            self.renderer.apply(commands);
        }
    }

    fn apply_control(&mut self, control: ControlMessage) -> bool {
        match control {
            ControlMessage::ToggleChanged { enabled } => {
                let changed = self.enabled != enabled;
                self.enabled = enabled;
                info!(target = "overlay", enabled, "overlay toggle changed");
                changed
            }
        }
    }

    /// Spawns the loop; it listens for toggle changes on `bus` and runs until
    /// the task is aborted.
    pub fn spawn(mut self, bus: Arc<dyn Bus>) -> JoinHandle<()> {
        let mut control = bus.subscribe(TOPIC_RUNTIME_CONTROL);
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut control_open = true;
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    received = control.recv(), if control_open => match received {
                        Ok(message) => match message.decode::<ControlMessage>() {
                            Ok(control) => {
                                if self.apply_control(control) {
                                    self.run_once().await;
                                }
                            }
                            Err(err) => debug!(target = "overlay", error = %err, "ignoring control message"),
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target = "overlay", skipped, "control listener lagged");
                        }
                        Err(RecvError::Closed) => {
                            debug!(target = "overlay", "control channel closed; polling only");
                            control_open = false;
                        }
                    },
                }
            }
        })
    }
}
