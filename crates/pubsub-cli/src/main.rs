mod config;
mod error;
mod listen;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

use crate::config::{FileConfig, GroupAssignment};
use crate::error::CliResult;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

/// Subscribe to channels and channel groups and print what arrives.
///
/// Data events go to stdout as JSON lines; connection changes, errors and
/// logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "pubsub-subscribe", version)]
struct Cli {
    /// YAML config file; flags and environment override its values
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[arg(long, env = "PUBSUB_SUBSCRIBE_KEY")]
    subscribe_key: Option<String>,
    #[arg(long, env = "PUBSUB_PUBLISH_KEY")]
    publish_key: Option<String>,
    /// Sign every request with this key
    #[arg(long, env = "PUBSUB_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,
    /// Accepted but unused: payloads are printed as received
    #[arg(long, env = "PUBSUB_CIPHER_KEY", hide_env_values = true)]
    cipher_key: Option<String>,
    #[arg(long, env = "PUBSUB_UUID")]
    uuid: Option<String>,
    /// Server host[:port]
    #[arg(long, env = "PUBSUB_ORIGIN")]
    origin: Option<String>,
    /// Use https (default true)
    #[arg(long)]
    ssl: Option<bool>,
    /// Channels, comma separated; `prefix.*` subscribes to a wildcard
    #[arg(long, value_delimiter = ',')]
    channels: Vec<String>,
    /// Channel groups, comma separated
    #[arg(long, value_delimiter = ',')]
    groups: Vec<String>,
    /// Also subscribe to presence for every channel and group
    #[arg(long)]
    presence: bool,
    /// Presence heartbeat timeout in seconds
    #[arg(long)]
    presence_timeout: Option<u32>,
    /// Register channels into a group before subscribing: GROUP=CH1,CH2
    #[arg(long)]
    add_to_group: Option<GroupAssignment>,
    #[arg(long)]
    poll_timeout_secs: Option<u64>,
    /// Reconnect attempts before giving up
    #[arg(long)]
    max_retries: Option<u32>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    let file = match &cli.config {
        Some(path) => config::load(path).await?,
        None => FileConfig::default(),
    };
    let settings = config::resolve(file, &cli)?;
    listen::run(settings).await
}
