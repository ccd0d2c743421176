use anyhow::Result;
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{to_i64, to_u64},
    models::MessageState,
};
use crate::platform::{MessageRef, UserId};

fn panel_to_i64(panel: Option<MessageRef>) -> Result<Option<i64>> {
    panel.map(to_i64).transpose()
}

fn panel_from_i64(raw: Option<i64>, field: &str) -> Result<Option<MessageRef>> {
    raw.map(|value| to_u64(value, field)).transpose()
}

impl Database {
    pub async fn get_message_state(&self, user_id: UserId) -> Result<Option<MessageState>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, join_panel, leave_panel
                 FROM message_states
                 WHERE user_id = ?1",
            )?;

            let mut rows = stmt.query(params![to_i64(user_id)?])?;
            let state = match rows.next()? {
                Some(row) => {
                    let join_panel: Option<i64> = row.get(1)?;
                    let leave_panel: Option<i64> = row.get(2)?;
                    Some(MessageState {
                        user_id,
                        join_panel: panel_from_i64(join_panel, "join_panel")?,
                        leave_panel: panel_from_i64(leave_panel, "leave_panel")?,
                    })
                }
                None => None,
            };
            Ok(state)
        })
        .await
    }

    pub async fn set_message_state(
        &self,
        user_id: UserId,
        join_panel: Option<MessageRef>,
        leave_panel: Option<MessageRef>,
    ) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO message_states (user_id, join_panel, leave_panel)
                 VALUES (?1, ?2, ?3)",
                params![to_i64(user_id)?, panel_to_i64(join_panel)?, panel_to_i64(leave_panel)?],
            )?;
            Ok(())
        })
        .await
    }

    /// Users whose last rendered panel is still an open join panel.
    /// Recovery reconciles these against the rebuilt live table.
    pub async fn states_with_join_panel(&self) -> Result<Vec<MessageState>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, join_panel, leave_panel
                 FROM message_states
                 WHERE join_panel IS NOT NULL",
            )?;

            let mut rows = stmt.query([])?;
            let mut states = Vec::new();
            while let Some(row) = rows.next()? {
                let user_id: i64 = row.get(0)?;
                let join_panel: Option<i64> = row.get(1)?;
                let leave_panel: Option<i64> = row.get(2)?;
                states.push(MessageState {
                    user_id: to_u64(user_id, "user_id")?,
                    join_panel: panel_from_i64(join_panel, "join_panel")?,
                    leave_panel: panel_from_i64(leave_panel, "leave_panel")?,
                });
            }
            Ok(states)
        })
        .await
    }
}
