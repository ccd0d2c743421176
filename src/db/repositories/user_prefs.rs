use anyhow::Result;
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{to_i64, to_u64},
    models::UserPrefs,
};
use crate::platform::UserId;

impl Database {
    pub async fn get_user_prefs(&self, user_id: UserId) -> Result<Option<UserPrefs>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, task_text, reading_alias
                 FROM user_prefs
                 WHERE user_id = ?1",
            )?;

            let mut rows = stmt.query(params![to_i64(user_id)?])?;
            let prefs = match rows.next()? {
                Some(row) => {
                    let user_id: i64 = row.get(0)?;
                    Some(UserPrefs {
                        user_id: to_u64(user_id, "user_id")?,
                        task_text: row.get(1)?,
                        reading_alias: row.get(2)?,
                    })
                }
                None => None,
            };
            Ok(prefs)
        })
        .await
    }

    pub async fn set_user_task(&self, user_id: UserId, task: Option<String>) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO user_prefs (user_id, task_text) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET task_text = excluded.task_text",
                params![to_i64(user_id)?, task],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_reading_alias(&self, user_id: UserId, alias: Option<String>) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO user_prefs (user_id, reading_alias) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET reading_alias = excluded.reading_alias",
                params![to_i64(user_id)?, alias],
            )?;
            Ok(())
        })
        .await
    }
}
