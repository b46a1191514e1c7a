use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::Path;
use tracing::warn;

use crate::filter::TargetFilter;
use crate::mute::MuteWindow;
use crate::platform::RenderMode;
use crate::scheduler::validate_cron;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub delivery: DeliveryConfig,
    pub filter: FilterConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

/// The read identity: a bot that is a member of the monitored chat.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub bot_token: String,
    /// Monitored group or channel
    pub chat_id: i64,
}

/// The write identity: a bot that posts notifications.
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    pub bot_token: String,
    /// Notification destination
    pub chat_id: i64,
    #[serde(default)]
    pub render_mode: RenderMode,
    #[serde(default = "default_true")]
    pub announce_startup: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    pub target_user_ids: IdList,
}

/// Sender ids, either as a TOML array or a comma-separated string
/// (`"111, 222"`), the latter matching the old `.env` style.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum IdList {
    List(Vec<i64>),
    Csv(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// `HH:MM`, local to `timezone`
    #[serde(default)]
    pub mute_start: Option<String>,
    #[serde(default)]
    pub mute_end: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            mute_start: None,
            mute_end: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,
    /// 0 disables age-based expiry
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: i64,
    #[serde(default = "default_sweep_cron")]
    pub sweep_cron: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: default_dedup_capacity(),
            retention_minutes: default_retention_minutes(),
            sweep_cron: default_sweep_cron(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_heartbeat_cron")]
    pub heartbeat_cron: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            heartbeat_cron: default_heartbeat_cron(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "US/Pacific".to_string()
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_retention_minutes() -> i64 {
    24 * 60
}

fn default_sweep_cron() -> String {
    "0 */10 * * * *".to_string()
}

fn default_heartbeat_cron() -> String {
    "0 0 * * * *".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject anything that would only fail after connecting.
    pub fn validate(&self) -> Result<()> {
        if self.source.bot_token.trim().is_empty() {
            bail!("[source] bot_token is empty");
        }
        if self.delivery.bot_token.trim().is_empty() {
            bail!("[delivery] bot_token is empty");
        }
        if self.source.bot_token == self.delivery.bot_token {
            warn!("[source] and [delivery] use the same bot token; both identities share one account");
        }
        self.target_filter()?;
        self.timezone()?;
        self.mute_window()?;
        self.dedup_capacity()?;
        self.dedup_retention()?;
        validate_cron(&self.dedup.sweep_cron).context("Invalid [dedup] sweep_cron")?;
        validate_cron(&self.general.heartbeat_cron).context("Invalid [general] heartbeat_cron")?;
        Ok(())
    }

    pub fn target_filter(&self) -> Result<TargetFilter> {
        let ids = match &self.filter.target_user_ids {
            IdList::List(ids) => ids.clone(),
            IdList::Csv(raw) => parse_id_list(raw)?,
        };
        if ids.is_empty() {
            bail!("[filter] target_user_ids is empty");
        }
        Ok(TargetFilter::new(ids))
    }

    pub fn timezone(&self) -> Result<Tz> {
        let name = &self.schedule.timezone;
        name.parse::<Tz>()
            .map_err(|e| anyhow!("Unknown timezone '{}': {}", name, e))
    }

    /// `None` when no mute period is configured.
    pub fn mute_window(&self) -> Result<Option<MuteWindow>> {
        match (&self.schedule.mute_start, &self.schedule.mute_end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => Ok(Some(MuteWindow::new(
                parse_time_of_day(start).context("Invalid [schedule] mute_start")?,
                parse_time_of_day(end).context("Invalid [schedule] mute_end")?,
                self.timezone()?,
            ))),
            _ => bail!("[schedule] mute_start and mute_end must be set together"),
        }
    }

    pub fn dedup_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.dedup.capacity)
            .ok_or_else(|| anyhow!("[dedup] capacity must be greater than zero"))
    }

    /// `None` when retention is 0, meaning entries live until LRU eviction.
    pub fn dedup_retention(&self) -> Result<Option<chrono::Duration>> {
        match self.dedup.retention_minutes {
            0 => Ok(None),
            m if m < 0 => bail!("[dedup] retention_minutes must not be negative"),
            m => chrono::Duration::try_minutes(m)
                .map(Some)
                .ok_or_else(|| anyhow!("[dedup] retention_minutes {} is out of range", m)),
        }
    }
}

fn parse_id_list(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("Invalid user id in target_user_ids: '{}'", s))
        })
        .collect()
}

fn parse_time_of_day(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .with_context(|| format!("Expected HH:MM, got '{}'", raw))
}
