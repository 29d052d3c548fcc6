use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use context_bus::{publish_json, LocalBus, TOPIC_PAGE_BRIDGE};
use frame_interceptor::loopback::LoopbackFactory;
use frame_interceptor::{Channel, ChannelEvent, ChannelFactory, EventKind, OutboundData};
use frame_relay::{FilePreferences, PreferenceStore, ToggleNotifier};
use parking_lot::Mutex;
use peek_proto::{BridgeMessage, CapturedData, Direction, Frame, BINARY_PLACEHOLDER};
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{info, warn};
use vote_overlay::{CorrelationEngine, LogSurface, OverlayCommand};

use crate::config::{AppConfig, Command, ToggleState};
use crate::pipeline::{load_page, FilePage, Pipeline};
use crate::socket::WsFactory;

const RELAY_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(config: &AppConfig) -> Result<()> {
    let mut stdout = std::io::stdout();
    match &config.command {
        Command::Observe {
            url,
            page,
            protocols,
            send,
            duration_secs,
        } => observe(config, url, page, protocols, send, duration_secs.map(Duration::from_secs)).await,
        Command::Replay { frames, page, url } => {
            let commands = replay(config, frames, page, url).await?;
            print_commands(&mut stdout, &commands)
        }
        Command::Frames { frames, url } => {
            let stored = load_frames(config, frames, url).await?;
            serde_json::to_writer_pretty(&mut stdout, &stored)?;
            writeln!(stdout)?;
            Ok(())
        }
        Command::Toggle { state } => {
            let enabled = toggle(config, *state)?;
            writeln!(stdout, "overlay {}", if enabled { "enabled" } else { "disabled" })?;
            Ok(())
        }
        Command::Status => {
            let enabled = FilePreferences::new(&config.preferences_path).enabled()?;
            writeln!(stdout, "overlay:        {}", if enabled { "on" } else { "off" })?;
            writeln!(stdout, "preferences:    {}", config.preferences_path.display())?;
            writeln!(stdout, "target host:    {}", config.target_host)?;
            writeln!(stdout, "poll interval:  {}ms", config.poll_interval.as_millis())?;
            writeln!(stdout, "store capacity: {}", config.store_capacity)?;
            Ok(())
        }
    }
}

/// One recorded frame. Exported frames also carry their capture time and
/// endpoint; other fields are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRecord {
    pub direction: Direction,
    pub payload: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub source_url: Option<String>,
}

pub fn read_records(path: &Path) -> Result<Vec<ReplayRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read frames file {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid frame record", path.display(), idx + 1))
        })
        .collect()
}

/// Replays `records` through an observed loopback channel the way the page
/// would: incoming payloads reach a registered message listener, outgoing
/// ones go through `send`. Records with a timestamp were captured already;
/// they are posted on the page bridge as-is so their capture time survives.
async fn ingest(
    pipeline: &Pipeline<LoopbackFactory>,
    url: &str,
    records: &[ReplayRecord],
) -> Result<()> {
    let channel = pipeline.factory()?.connect(url, &[])?;
    if !channel.is_observed() {
        bail!("{url} is not on the observed host; nothing would be captured");
    }
    channel.add_event_listener(EventKind::Message, Arc::new(|_: &ChannelEvent| {}));

    let before = pipeline.store().total_appended();
    let bus = pipeline.bus();
    for record in records {
        let binary = record.payload == BINARY_PLACEHOLDER;
        if let Some(timestamp) = record.timestamp {
            let data = if binary {
                CapturedData::Binary(&[])
            } else {
                CapturedData::Text(&record.payload)
            };
            let source_url = record.source_url.as_deref().unwrap_or(url);
            let frame = Frame::at(timestamp, record.direction, data, source_url);
            publish_json(
                bus.as_ref(),
                TOPIC_PAGE_BRIDGE,
                &BridgeMessage::WebsocketIntercept { payload: frame },
            )?;
            continue;
        }
        match (record.direction, binary) {
            (Direction::Incoming, false) => channel.inner().deliver_text(&record.payload),
            (Direction::Incoming, true) => channel.inner().deliver_binary(Default::default()),
            (Direction::Outgoing, false) => {
                channel.send(OutboundData::Text(record.payload.clone()))?
            }
            (Direction::Outgoing, true) => channel.send(OutboundData::Binary(Default::default()))?,
        }
    }
    pipeline
        .wait_for_frames(before + records.len() as u64, RELAY_SETTLE_TIMEOUT)
        .await
}

/// Runs the recorded frames through the full capture path and one
/// correlation pass over `page_path`.
pub async fn replay(
    config: &AppConfig,
    frames_path: &Path,
    page_path: &Path,
    url: &str,
) -> Result<Vec<OverlayCommand>> {
    let records = read_records(frames_path)?;
    let page = load_page(page_path)?;
    let pipeline = Pipeline::start(config, LoopbackFactory::new())?;
    let result = async {
        ingest(&pipeline, url, &records).await?;
        let frames = pipeline.relay().read_all().await?;
        let enabled = pipeline.enabled()?;
        info!(frames = frames.len(), enabled, "replayed frames");
        Ok::<_, anyhow::Error>(CorrelationEngine::default().tick(enabled, &frames, &page))
    }
    .await;
    pipeline.shutdown().await;
    result
}

/// Replays the frames file and returns the store contents, as the popup
/// would show them.
pub async fn load_frames(config: &AppConfig, frames_path: &Path, url: &str) -> Result<Vec<Frame>> {
    let records = read_records(frames_path)?;
    let pipeline = Pipeline::start(config, LoopbackFactory::new())?;
    let result = async {
        ingest(&pipeline, url, &records).await?;
        Ok::<_, anyhow::Error>(pipeline.relay().read_all().await?)
    }
    .await;
    pipeline.shutdown().await;
    result
}

pub fn toggle(config: &AppConfig, state: ToggleState) -> Result<bool> {
    let preferences = FilePreferences::new(&config.preferences_path);
    let notifier = ToggleNotifier::new(Arc::new(preferences), Arc::new(LocalBus::new()));
    let changed = notifier.set_enabled(state.enabled())?;
    info!(enabled = state.enabled(), changed, "overlay preference stored");
    Ok(state.enabled())
}

fn print_commands(out: &mut impl Write, commands: &[OverlayCommand]) -> Result<()> {
    if commands.is_empty() {
        writeln!(out, "no changes")?;
    }
    for command in commands {
        match command {
            OverlayCommand::RemoveAllBadges => writeln!(out, "remove-all")?,
            OverlayCommand::AddBadge(badge) => writeln!(
                out,
                "badge voter={} label={} delay_ms={} at=({:.0},{:.0}) picture={}",
                badge.voter_user_id,
                badge.label,
                badge.delay.as_millis(),
                badge.anchor.x,
                badge.anchor.y,
                badge.picture
            )?,
        }
    }
    Ok(())
}

/// Connects to a live endpoint through the interceptor and keeps the overlay
/// running until Ctrl-C, the channel closing, or `duration` elapsing.
pub async fn observe(
    config: &AppConfig,
    url: &str,
    page_path: &Path,
    protocols: &[String],
    send: &[String],
    duration: Option<Duration>,
) -> Result<()> {
    let page = Arc::new(FilePage::open(page_path)?);
    let mut pipeline = Pipeline::start(config, WsFactory::new())?;
    pipeline.spawn_overlay(page, Arc::new(LogSurface::new()))?;
    pipeline.spawn_preference_watch()?;

    let channel = pipeline.factory()?.connect(url, protocols)?;
    if !channel.is_observed() {
        warn!(url, host = %config.target_host, "endpoint is not on the observed host; no frames will be captured");
    }

    let (open_tx, open_rx) = oneshot::channel::<()>();
    let open_tx = Mutex::new(Some(open_tx));
    channel.add_event_listener(
        EventKind::Open,
        Arc::new(move |_: &ChannelEvent| {
            if let Some(tx) = open_tx.lock().take() {
                let _ = tx.send(());
            }
        }),
    );
    let (closed_tx, mut closed_rx) = oneshot::channel::<(u16, String)>();
    let closed_tx = Mutex::new(Some(closed_tx));
    channel.add_event_listener(
        EventKind::Close,
        Arc::new(move |event: &ChannelEvent| {
            if let ChannelEvent::Close { code, reason } = event {
                if let Some(tx) = closed_tx.lock().take() {
                    let _ = tx.send((*code, reason.clone()));
                }
            }
        }),
    );
    // frames are captured for the page's own message listener
    channel.add_event_listener(EventKind::Message, Arc::new(|_: &ChannelEvent| {}));

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    tokio::select! {
        opened = open_rx => {
            if opened.is_ok() {
                info!(url, "channel open");
                for text in send {
                    channel.send(OutboundData::Text(text.clone()))?;
                }
            }
        }
        closed = &mut closed_rx => {
            let (code, reason) = closed.unwrap_or((1006, String::new()));
            pipeline.shutdown().await;
            bail!("channel closed before opening (code {code}, reason {reason:?})");
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = &mut deadline => info!("observation window elapsed"),
        closed = &mut closed_rx => {
            if let Ok((code, reason)) = closed {
                info!(code, %reason, "channel closed");
            }
        }
    }

    let _ = channel.close();
    pipeline.shutdown().await;
    Ok(())
}
