//! File-based control surface.
//!
//! Administration drops a command into `<data_dir>/stream_control.txt`
//! (`start`, `stop` or `restart`, optionally followed by a channel id, or
//! `loglevel <directive>`) and reads channel statuses back from
//! `<data_dir>/stream_status.json`.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::ChannelManager;
use crate::domain::{ChannelId, StreamStatus};
use crate::logging::LoggingConfig;
use crate::{Error, Result};

pub const CONTROL_FILE_NAME: &str = "stream_control.txt";
pub const STATUS_FILE_NAME: &str = "stream_status.json";

/// Channel addressed by commands without an explicit id.
pub const DEFAULT_CHANNEL_ID: ChannelId = 1;

/// How often the control file is checked.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// An administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start(ChannelId),
    Stop(ChannelId),
    Restart(ChannelId),
    /// Replace the log filter, e.g. `loglevel newscast=debug,sqlx=warn`.
    LogLevel(String),
}

impl ControlCommand {
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Self::Start(id) | Self::Stop(id) | Self::Restart(id) => Some(*id),
            Self::LogLevel(_) => None,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(id) => write!(f, "start {id}"),
            Self::Stop(id) => write!(f, "stop {id}"),
            Self::Restart(id) => write!(f, "restart {id}"),
            Self::LogLevel(directive) => write!(f, "loglevel {directive}"),
        }
    }
}

impl FromStr for ControlCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| Error::validation("empty control command"))?
            .to_ascii_lowercase();

        if verb == "loglevel" {
            let directive = parts.collect::<Vec<_>>().join("");
            if directive.is_empty() {
                return Err(Error::validation("loglevel needs a filter directive"));
            }
            return Ok(Self::LogLevel(directive));
        }

        let channel_id = match parts.next() {
            Some(raw) => raw
                .parse::<ChannelId>()
                .map_err(|_| Error::validation(format!("invalid channel id '{raw}'")))?,
            None => DEFAULT_CHANNEL_ID,
        };
        if let Some(extra) = parts.next() {
            return Err(Error::validation(format!("unexpected argument '{extra}'")));
        }

        match verb.as_str() {
            "start" => Ok(Self::Start(channel_id)),
            "stop" => Ok(Self::Stop(channel_id)),
            "restart" => Ok(Self::Restart(channel_id)),
            other => Err(Error::validation(format!("unknown control command '{other}'"))),
        }
    }
}

/// Contents of the status file.
#[derive(Debug, Serialize)]
struct StatusSnapshot<'a> {
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_filter: Option<String>,
    channels: &'a [StreamStatus],
}

/// Polls the control file and publishes channel statuses.
pub struct ControlWatcher {
    manager: Arc<ChannelManager>,
    logging: Option<Arc<LoggingConfig>>,
    control_path: PathBuf,
    status_path: PathBuf,
    interval: Duration,
}

impl ControlWatcher {
    pub fn new(manager: Arc<ChannelManager>, data_dir: &Path) -> Self {
        Self {
            manager,
            logging: None,
            control_path: data_dir.join(CONTROL_FILE_NAME),
            status_path: data_dir.join(STATUS_FILE_NAME),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Allow `loglevel` commands to change the installed log filter.
    pub fn with_logging(mut self, logging: Arc<LoggingConfig>) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    /// Consume the control file, if present, and return its commands.
    ///
    /// Lines that fail to parse are logged and skipped.
    pub async fn take_commands(&self) -> Result<Vec<ControlCommand>> {
        let contents = match tokio::fs::read_to_string(&self.control_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io_path("reading", &self.control_path, e)),
        };
        match tokio::fs::remove_file(&self.control_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_path("removing", &self.control_path, e)),
        }

        let commands = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| match line.parse::<ControlCommand>() {
                Ok(command) => Some(command),
                Err(e) => {
                    warn!("Ignoring control line '{}': {}", line, e);
                    None
                }
            })
            .collect();
        Ok(commands)
    }

    /// Execute one command against the channel manager.
    pub async fn apply(&self, command: &ControlCommand) -> Result<()> {
        info!("Control command: {}", command);
        match command {
            ControlCommand::Start(id) => self.manager.start(*id).await,
            ControlCommand::Stop(id) => {
                self.manager.stop(*id).await;
                Ok(())
            }
            ControlCommand::Restart(id) => self.manager.restart(*id).await,
            ControlCommand::LogLevel(directive) => match &self.logging {
                Some(logging) => logging.set_filter(directive),
                None => Err(Error::validation("log filter is not reloadable")),
            },
        }
    }

    /// Write the status of every channel, atomically replacing the file.
    pub async fn write_status(&self) -> Result<()> {
        let channels = self.manager.statuses();
        let snapshot = StatusSnapshot {
            updated_at: Utc::now(),
            log_filter: self.logging.as_ref().map(|logging| logging.get_filter()),
            channels: &channels,
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = self.status_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::io_path("writing", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.status_path)
            .await
            .map_err(|e| Error::io_path("renaming", &tmp, e))?;
        Ok(())
    }

    /// One poll: apply pending commands, then publish statuses.
    pub async fn poll_once(&self) -> Result<()> {
        for command in self.take_commands().await? {
            if let Err(e) = self.apply(&command).await {
                error!("Control command '{}' failed: {}", command, e);
            }
        }
        self.write_status().await
    }

    /// Poll until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Watching {} every {:?}",
            self.control_path.display(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("Control poll failed: {}", e);
                    }
                }
            }
        }

        // Leave a final snapshot for the administration side.
        if let Err(e) = self.write_status().await {
            debug!("Failed to write final status: {}", e);
        }
        debug!("Control watcher stopped");
    }
}
