use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use context_bus::{publish_json, Bus, LocalBus, TOPIC_RUNTIME_CONTROL};
use frame_interceptor::{ChannelFactory, FrameTap, InterceptingFactory, PageHook};
use frame_relay::{
    spawn_page_bridge, spawn_relay, BoundedFrameStore, FilePreferences, PreferenceStore,
    RelayHandle,
};
use parking_lot::RwLock;
use peek_proto::{is_estimate_session_url, ControlMessage, TargetMatcher};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vote_overlay::{
    BadgeSurface, CorrelationEngine, OverlayLoop, OverlayRenderer, PageDocument, PageSource,
};

use crate::config::AppConfig;

/// Bus buffer; sized above the store so a burst of captures is not lagged out.
const BUS_CAPACITY: usize = 4096;

fn bus_capacity(store_capacity: usize) -> usize {
    BUS_CAPACITY.max(store_capacity.saturating_mul(2))
}

/// Every execution context of one page load wired together in-process:
/// interceptor hook, page bridge, relay and (optionally) the overlay loop.
pub struct Pipeline<F> {
    bus: Arc<LocalBus>,
    store: Arc<BoundedFrameStore>,
    relay: RelayHandle,
    hook: PageHook<F>,
    preferences: Arc<FilePreferences>,
    poll_interval: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl<F: ChannelFactory> Pipeline<F> {
    pub fn start(config: &AppConfig, factory: F) -> Result<Self> {
        let preferences = Arc::new(FilePreferences::new(&config.preferences_path));
        preferences
            .ensure_default()
            .with_context(|| format!("failed to initialise {}", config.preferences_path.display()))?;

        let bus = Arc::new(LocalBus::with_capacity(bus_capacity(config.store_capacity)));
        let store = Arc::new(BoundedFrameStore::with_capacity(config.store_capacity));
        let (relay, relay_task) = spawn_relay(store.clone());
        let bridge_task = spawn_page_bridge(bus.clone(), relay.clone());

        let hook = PageHook::new();
        hook.install(
            factory,
            TargetMatcher::new(config.target_host.clone()),
            FrameTap::new(bus.clone()),
        );

        info!(
            target_host = %config.target_host,
            store_capacity = config.store_capacity,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "pipeline started"
        );
        Ok(Self {
            bus,
            store,
            relay,
            hook,
            preferences,
            poll_interval: config.poll_interval,
            tasks: vec![relay_task, bridge_task],
        })
    }

    pub fn factory(&self) -> Result<&InterceptingFactory<F>> {
        self.hook
            .factory()
            .context("channel interceptor is not installed")
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    pub fn store(&self) -> &Arc<BoundedFrameStore> {
        &self.store
    }

    pub fn bus(&self) -> Arc<dyn Bus> {
        self.bus.clone()
    }

    pub fn enabled(&self) -> Result<bool> {
        Ok(self.preferences.enabled()?)
    }

    /// Starts the periodic overlay over `page`, drawing onto `surface`.
    pub fn spawn_overlay(
        &mut self,
        page: Arc<dyn PageSource>,
        surface: Arc<dyn BadgeSurface>,
    ) -> Result<()> {
        let enabled = self.enabled()?;
        let overlay = OverlayLoop::new(
            Arc::new(CorrelationEngine::default()),
            Arc::new(self.relay.clone()),
            page,
            OverlayRenderer::new(surface),
            enabled,
        )
        .with_period(self.poll_interval);
        self.tasks.push(overlay.spawn(self.bus()));
        Ok(())
    }

    /// Watches the preferences file and announces toggle changes made by
    /// another process on the control topic.
    pub fn spawn_preference_watch(&mut self) -> Result<()> {
        let preferences = self.preferences.clone();
        let bus = self.bus.clone();
        let mut last = preferences.enabled()?;
        let period = self.poll_interval;
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let enabled = match preferences.enabled() {
                    Ok(enabled) => enabled,
                    Err(err) => {
                        warn!(error = %err, "failed to read overlay preference");
                        continue;
                    }
                };
                if enabled == last {
                    continue;
                }
                last = enabled;
                let message = ControlMessage::ToggleChanged { enabled };
                if let Err(err) = publish_json(bus.as_ref(), TOPIC_RUNTIME_CONTROL, &message) {
                    warn!(error = %err, "failed to announce overlay preference");
                }
            }
        }));
        Ok(())
    }

    /// Waits until the relay has appended `expected` frames in total.
    pub async fn wait_for_frames(&self, expected: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.store.total_appended() < expected {
            if Instant::now() >= deadline {
                bail!(
                    "relay stored {} of {} frames before timing out",
                    self.store.total_appended(),
                    expected
                );
            }
            sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    pub async fn shutdown(self) {
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
        debug!("pipeline stopped");
    }
}

/// Reads a page snapshot file.
pub fn load_page(path: &Path) -> Result<PageDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read page snapshot {}", path.display()))?;
    let page = PageDocument::from_json(&raw)
        .with_context(|| format!("invalid page snapshot {}", path.display()))?;
    match page.url() {
        Some(url) if !is_estimate_session_url(url) => {
            warn!(url, "page is not an estimate session; badges may have nowhere to go");
        }
        _ => {}
    }
    Ok(page)
}

/// Page source backed by a snapshot file that is re-read on every tick, so
/// edits to the file behave like DOM changes. Keeps the last good snapshot
/// when the file is briefly unreadable.
pub struct FilePage {
    path: PathBuf,
    last: RwLock<PageDocument>,
}

impl FilePage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let first = load_page(&path)?;
        Ok(Self {
            path,
            last: RwLock::new(first),
        })
    }
}

impl PageSource for FilePage {
    fn snapshot(&self) -> PageDocument {
        match std::fs::read_to_string(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Ok(PageDocument::from_json(&raw)?))
        {
            Ok(page) => {
                *self.last.write() = page.clone();
                page
            }
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "keeping previous page snapshot");
                self.last.read().clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Command;
    use frame_interceptor::loopback::LoopbackFactory;
    use frame_interceptor::{Channel, ChannelEvent, EventKind};

    fn config(dir: &Path) -> AppConfig {
        AppConfig {
            log_filter: "info".into(),
            target_host: "action.parabol.co".into(),
            poll_interval: Duration::from_millis(2000),
            store_capacity: 3,
            preferences_path: dir.join("prefs.json"),
            print_metrics: false,
            command: Command::Status,
        }
    }

    #[tokio::test]
    async fn captured_frames_reach_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = Pipeline::start(&config(dir.path()), LoopbackFactory::new()).expect("start");
        assert!(dir.path().join("prefs.json").exists());

        let factory = pipeline.factory().expect("factory");
        let channel = factory
            .connect("wss://action.parabol.co/graphql", &[])
            .expect("connect");
        channel.add_event_listener(EventKind::Message, Arc::new(|_: &ChannelEvent| {}));
        for idx in 0..5 {
            channel.inner().deliver_text(&format!("frame-{idx}"));
        }

        pipeline
            .wait_for_frames(5, Duration::from_secs(2))
            .await
            .expect("frames relayed");
        let payloads: Vec<String> = pipeline
            .relay()
            .read_all()
            .await
            .expect("read")
            .iter()
            .map(|frame| frame.payload().to_string())
            .collect();
        assert_eq!(payloads, ["frame-2", "frame-3", "frame-4"]);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn wait_for_frames_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = Pipeline::start(&config(dir.path()), LoopbackFactory::new()).expect("start");
        assert!(pipeline
            .wait_for_frames(1, Duration::from_millis(20))
            .await
            .is_err());
        pipeline.shutdown().await;
    }

    #[test]
    fn bus_capacity_covers_the_store_without_overflowing() {
        assert_eq!(bus_capacity(1000), BUS_CAPACITY);
        assert_eq!(bus_capacity(10_000), 20_000);
        assert_eq!(bus_capacity(usize::MAX / 2 + 1), usize::MAX);
    }

    #[test]
    fn file_page_keeps_last_good_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("page.json");
        std::fs::write(&path, r#"{"root":{"tag":"body","children":[{"tag":"img","attrs":{"src":"a"}}]}}"#)
            .expect("write");
        let page = FilePage::open(&path).expect("open");
        assert_eq!(page.snapshot().images().len(), 1);

        std::fs::write(&path, "{ truncated").expect("write");
        assert_eq!(page.snapshot().images().len(), 1);

        std::fs::write(&path, r#"{"root":{"tag":"body"}}"#).expect("write");
        assert!(page.snapshot().images().is_empty());
    }
}
