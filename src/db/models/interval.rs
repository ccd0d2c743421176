use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::platform::UserId;

/// One closed, durable billed segment of work time. Append-only: never
/// updated after insert, removed only by retention pruning. The username
/// is a snapshot taken at write time so historical reports show the name
/// as it was then.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyInterval {
    pub id: String,
    pub user_id: UserId,
    pub username: String,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl StudyInterval {
    pub fn closed(
        user_id: UserId,
        username: &str,
        start_time: DateTime<Utc>,
        duration_seconds: i64,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            username: username.to_string(),
            start_time,
            duration_seconds,
            end_time,
            created_at: end_time,
        }
    }
}
