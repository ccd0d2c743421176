use serde::{Deserialize, Serialize};

use crate::platform::{MessageRef, UserId};

/// Which externally rendered panel currently represents a user's state,
/// so a stale one can be deleted before the next is posted. Display-sync
/// only; never consulted for timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageState {
    pub user_id: UserId,
    pub join_panel: Option<MessageRef>,
    pub leave_panel: Option<MessageRef>,
}
