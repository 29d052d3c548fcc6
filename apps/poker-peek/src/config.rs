use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use frame_relay::FRAME_STORE_CAPACITY;
use peek_proto::DEFAULT_TARGET_HOST;
use url::Url;

pub const DEFAULT_REPLAY_URL: &str = "wss://action.parabol.co/graphql";
/// Largest accepted store capacity; the store and bus buffers are allocated up front.
pub const MAX_STORE_CAPACITY: usize = 100_000;

#[derive(Debug, Parser)]
#[command(
    name = "poker-peek",
    author,
    version,
    about = "Reveal planning-poker votes from an estimate session's websocket traffic"
)]
pub struct Cli {
    /// Tracing filter used when RUST_LOG is unset.
    #[arg(long, env = "POKER_PEEK_LOG", default_value = "info,poker_peek=debug")]
    pub log_filter: String,

    /// Host whose channels are observed; subdomains match too.
    #[arg(long, env = "POKER_PEEK_TARGET_HOST", default_value = DEFAULT_TARGET_HOST)]
    pub target_host: String,

    /// Overlay polling interval.
    #[arg(long, env = "POKER_PEEK_POLL_INTERVAL_MS", default_value_t = 2000)]
    pub poll_interval_ms: u64,

    /// Frames kept by the relay store.
    #[arg(long, env = "POKER_PEEK_STORE_CAPACITY", default_value_t = FRAME_STORE_CAPACITY)]
    pub store_capacity: usize,

    /// JSON file holding the persisted overlay toggle.
    #[arg(
        long,
        env = "POKER_PEEK_PREFERENCES",
        default_value = ".poker-peek/preferences.json"
    )]
    pub preferences: PathBuf,

    /// Print the Prometheus exposition to stdout before exiting.
    #[arg(long, env = "POKER_PEEK_PRINT_METRICS", default_value_t = false)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Connect to a live endpoint and badge the page snapshot as votes arrive.
    Observe {
        /// Websocket endpoint to open.
        #[arg(long)]
        url: String,
        /// Page snapshot (JSON element tree); re-read every tick.
        #[arg(long)]
        page: PathBuf,
        /// Subprotocols offered during the handshake.
        #[arg(long = "protocol")]
        protocols: Vec<String>,
        /// Text frames sent once the channel opens.
        #[arg(long = "send")]
        send: Vec<String>,
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Feed recorded frames through a loopback channel and print the overlay
    /// commands one correlation pass produces.
    Replay {
        /// JSON lines, one `{"direction", "payload"}` record per line. Exported
        /// frames keep their `timestamp` and `sourceUrl`; bare records are
        /// stamped when replayed, in file order.
        #[arg(long)]
        frames: PathBuf,
        #[arg(long)]
        page: PathBuf,
        #[arg(long, default_value = DEFAULT_REPLAY_URL)]
        url: String,
    },
    /// Load recorded frames and print the relay store as pretty JSON.
    Frames {
        #[arg(long)]
        frames: PathBuf,
        #[arg(long, default_value = DEFAULT_REPLAY_URL)]
        url: String,
    },
    /// Persist the overlay toggle.
    Toggle { state: ToggleState },
    /// Print the persisted toggle and effective configuration.
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ToggleState {
    On,
    Off,
}

impl ToggleState {
    pub fn enabled(self) -> bool {
        matches!(self, ToggleState::On)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_filter: String,
    pub target_host: String,
    pub poll_interval: Duration,
    pub store_capacity: usize,
    pub preferences_path: PathBuf,
    pub print_metrics: bool,
    pub command: Command,
}

impl TryFrom<Cli> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if cli.poll_interval_ms == 0 {
            bail!("poll interval must be greater than zero");
        }
        if cli.store_capacity == 0 {
            bail!("store capacity must be greater than zero");
        }
        if cli.store_capacity > MAX_STORE_CAPACITY {
            bail!("store capacity must be at most {MAX_STORE_CAPACITY}");
        }
        let target_host = cli.target_host.trim().to_ascii_lowercase();
        let probe = Url::parse(&format!("wss://{target_host}/"))
            .with_context(|| format!("invalid target host: {}", cli.target_host))?;
        if probe.host_str() != Some(target_host.as_str()) {
            bail!("invalid target host: {}", cli.target_host);
        }
        Ok(AppConfig {
            log_filter: cli.log_filter,
            target_host,
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            store_capacity: cli.store_capacity,
            preferences_path: cli.preferences,
            print_metrics: cli.print_metrics,
            command: cli.command,
        })
    }
}
