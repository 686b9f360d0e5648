use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskcastError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on handlers running at once.
    pub max_concurrent: usize,
    /// Idle wait of the worker loop between scans.
    pub poll_interval_ms: u64,
    /// Used when a submission does not set `max_retries`.
    pub default_max_retries: u32,
    /// Start the worker loop on the first enqueue.
    pub autostart: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval_ms: 100,
            default_max_retries: 3,
            autostart: true,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Per-task replay buffer size.
    pub history_cap: usize,
    pub keepalive_secs: u64,
    /// Delay between a stream finishing and its cleanup.
    pub cleanup_grace_secs: u64,
    /// Keep the replay buffer after cleanup (listeners are always dropped).
    pub retain_history_on_cleanup: bool,
    /// Overall progress (%) above which an ETA is computed.
    pub eta_threshold_pct: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            history_cap: 1000,
            keepalive_secs: 30,
            cleanup_grace_secs: 24 * 60 * 60,
            retain_history_on_cleanup: false,
            eta_threshold_pct: 10.0,
        }
    }
}

impl StreamConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskcastConfig {
    pub scheduler: SchedulerConfig,
    pub streams: StreamConfig,
}

impl TaskcastConfig {
    /// Defaults overlaid with `TASKCAST_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        let s = &mut config.scheduler;
        override_with(&lookup, "TASKCAST_MAX_CONCURRENT", &mut s.max_concurrent)?;
        override_with(&lookup, "TASKCAST_POLL_INTERVAL_MS", &mut s.poll_interval_ms)?;
        override_with(&lookup, "TASKCAST_MAX_RETRIES", &mut s.default_max_retries)?;
        override_with(&lookup, "TASKCAST_AUTOSTART", &mut s.autostart)?;

        let st = &mut config.streams;
        override_with(&lookup, "TASKCAST_HISTORY_CAP", &mut st.history_cap)?;
        override_with(&lookup, "TASKCAST_KEEPALIVE_SECS", &mut st.keepalive_secs)?;
        override_with(&lookup, "TASKCAST_CLEANUP_GRACE_SECS", &mut st.cleanup_grace_secs)?;
        override_with(&lookup, "TASKCAST_RETAIN_HISTORY", &mut st.retain_history_on_cleanup)?;
        override_with(&lookup, "TASKCAST_ETA_THRESHOLD_PCT", &mut st.eta_threshold_pct)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent == 0 {
            return Err(TaskcastError::Config("max_concurrent must be > 0".into()));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(TaskcastError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.streams.history_cap == 0 {
            return Err(TaskcastError::Config("history_cap must be > 0".into()));
        }
        if self.streams.keepalive_secs == 0 {
            return Err(TaskcastError::Config("keepalive_secs must be > 0".into()));
        }
        let pct = self.streams.eta_threshold_pct;
        if !(0.0..100.0).contains(&pct) {
            return Err(TaskcastError::Config(format!(
                "eta_threshold_pct must be in [0, 100), got {pct}"
            )));
        }
        Ok(())
    }
}

fn override_with<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| TaskcastError::Config(format!("invalid {key}={raw}: {e}")))?;
    }
    Ok(())
}
