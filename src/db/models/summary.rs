use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::platform::UserId;

/// Per-user-per-day rollup written by the maintenance job. Survives raw
/// interval pruning; keyed on (user_id, date) with upsert semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub user_id: UserId,
    pub username: String,
    pub date: NaiveDate,
    pub total_seconds: i64,
}
