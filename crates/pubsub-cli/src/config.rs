use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use pubsub_subscriber::{ClientConfig, PRESENCE_SUFFIX, Target, WILDCARD_SUFFIX};
use serde::Deserialize;

use crate::Cli;
use crate::error::{CliError, CliResult};

/// Contents of the optional YAML config file. Every field can be overridden
/// on the command line or through the environment.
#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub subscribe_key: Option<String>,
    pub publish_key: Option<String>,
    pub secret_key: Option<String>,
    pub cipher_key: Option<String>,
    pub uuid: Option<String>,
    pub origin: Option<String>,
    pub ssl: Option<bool>,
    pub channels: Vec<String>,
    pub groups: Vec<String>,
    pub presence: Option<bool>,
    pub presence_timeout: Option<u32>,
    pub poll_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub add_to_group: Option<GroupAssignment>,
}

/// Channels to register into a group before subscribing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupAssignment {
    pub group: String,
    pub channels: Vec<String>,
}

impl FromStr for GroupAssignment {
    type Err = String;

    /// `GROUP=CH1,CH2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, channels) = s
            .split_once('=')
            .ok_or_else(|| format!("expected GROUP=CH1,CH2, got {s:?}"))?;
        let channels: Vec<String> = channels
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        if group.trim().is_empty() || channels.is_empty() {
            return Err(format!("expected GROUP=CH1,CH2, got {s:?}"));
        }
        Ok(Self {
            group: group.trim().to_string(),
            channels,
        })
    }
}

/// Everything the subscriber needs, after merging file, environment and flags.
#[derive(Debug)]
pub struct Settings {
    pub client: ClientConfig,
    pub targets: Vec<Target>,
    pub add_to_group: Option<GroupAssignment>,
}

/// Load a config file.
pub async fn load(path: &Path) -> CliResult<FileConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CliError::Config(format!("read {}: {e}", path.display())))?;
    serde_yaml_ng::from_str(&content)
        .map_err(|e| CliError::Config(format!("parse {}: {e}", path.display())))
}

/// Merge the config file with command-line values. Flags win.
pub fn resolve(file: FileConfig, cli: &Cli) -> CliResult<Settings> {
    let subscribe_key = cli
        .subscribe_key
        .clone()
        .or(file.subscribe_key)
        .ok_or_else(|| {
            CliError::Config(
                "a subscribe key is required (--subscribe-key, PUBSUB_SUBSCRIBE_KEY or config file)"
                    .to_string(),
            )
        })?;

    let mut client = ClientConfig::new(subscribe_key);
    client.publish_key = cli.publish_key.clone().or(file.publish_key);
    client.secret_key = cli.secret_key.clone().or(file.secret_key);
    client.cipher_key = cli.cipher_key.clone().or(file.cipher_key);
    client.uuid = cli.uuid.clone().or(file.uuid);
    if let Some(origin) = cli.origin.clone().or(file.origin) {
        client.origin = origin;
    }
    if let Some(ssl) = cli.ssl.or(file.ssl) {
        client.ssl = ssl;
    }
    client.presence_timeout = cli.presence_timeout.or(file.presence_timeout);
    if let Some(secs) = cli.poll_timeout_secs.or(file.poll_timeout_secs) {
        client.timing.poll_timeout = Duration::from_secs(secs);
    }
    if let Some(retries) = cli.max_retries.or(file.max_retries) {
        client.timing.max_retry_attempts = retries;
    }
    client
        .validate()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let channels = if cli.channels.is_empty() {
        file.channels
    } else {
        cli.channels.clone()
    };
    let groups = if cli.groups.is_empty() {
        file.groups
    } else {
        cli.groups.clone()
    };

    let mut targets: Vec<Target> = channels
        .into_iter()
        .map(channel_target)
        .chain(groups.into_iter().map(Target::group))
        .collect();
    if cli.presence || file.presence.unwrap_or(false) {
        let twins: Vec<Target> = targets.iter().filter_map(Target::with_presence).collect();
        targets.extend(twins);
    }
    targets.sort();
    targets.dedup();
    if targets.is_empty() {
        return Err(CliError::Config(
            "nothing to subscribe to; pass --channels or --groups".to_string(),
        ));
    }

    Ok(Settings {
        client,
        targets,
        add_to_group: cli.add_to_group.clone().or(file.add_to_group),
    })
}

/// `sports.*` (and its presence form) subscribes to a wildcard; anything else
/// is a plain channel.
fn channel_target(name: String) -> Target {
    let pattern = name.strip_suffix(PRESENCE_SUFFIX).unwrap_or(&name);
    if pattern.ends_with(WILDCARD_SUFFIX) {
        Target::wildcard(name)
    } else {
        Target::channel(name)
    }
}
