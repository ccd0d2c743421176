use serde::{Deserialize, Serialize};

use crate::platform::UserId;

/// Per-user display preferences: the task text shown beside their live
/// session and an optional reading alias used for spoken announcements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPrefs {
    pub user_id: UserId,
    pub task_text: Option<String>,
    pub reading_alias: Option<String>,
}
