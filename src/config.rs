use std::collections::BTreeMap;
use std::env;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::milestones::default_milestones;

/// Runtime knobs for the tracking core. `Default` mirrors the values the
/// community ran with; `from_env` lets a deployment override the numeric
/// ones without a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Days of raw interval history to keep before pruning.
    pub keep_log_days: i64,
    /// Days of daily rollups to keep; survives interval pruning.
    pub keep_summary_days: i64,
    /// Local wall-clock time the daily maintenance job is scheduled for.
    pub maintenance_hour: u32,
    pub maintenance_minute: u32,
    /// Community timezone as seconds east of UTC.
    pub utc_offset_secs: i32,
    /// A restart within this many seconds of a user's last closed interval
    /// bridges that interval back into their displayed session.
    pub recovery_bridge_secs: i64,
    /// Minimum gap between two status-board refreshes.
    pub refresh_cooldown_secs: u64,
    /// Entries shown on the weekly ranking board.
    pub ranking_top_n: usize,
    /// Cumulative-hour badge thresholds, ascending.
    pub milestones: BTreeMap<u32, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keep_log_days: 30,
            keep_summary_days: 365,
            maintenance_hour: 23,
            maintenance_minute: 59,
            utc_offset_secs: 9 * 3600,
            recovery_bridge_secs: 600,
            refresh_cooldown_secs: 5,
            ranking_top_n: 10,
            milestones: default_milestones(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(days) = env_i64("STUDYHALL_KEEP_LOG_DAYS") {
            config.keep_log_days = days;
        }
        if let Some(days) = env_i64("STUDYHALL_KEEP_SUMMARY_DAYS") {
            config.keep_summary_days = days;
        }
        if let Some(secs) = env_i64("STUDYHALL_UTC_OFFSET_SECS") {
            config.utc_offset_secs = secs as i32;
        }
        if let Some(secs) = env_i64("STUDYHALL_RECOVERY_BRIDGE_SECS") {
            config.recovery_bridge_secs = secs;
        }
        if let Some(secs) = env_i64("STUDYHALL_REFRESH_COOLDOWN_SECS") {
            config.refresh_cooldown_secs = secs.max(0) as u64;
        }
        config
    }

    pub fn tz(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"))
    }
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok()?.parse().ok()
}
