use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{parse_date, to_i64, to_u64},
    models::DailySummary,
};
use crate::platform::UserId;

impl Database {
    pub async fn upsert_daily_summary(&self, summary: &DailySummary) -> Result<()> {
        let record = summary.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO daily_summaries (user_id, username, date, total_seconds)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    to_i64(record.user_id)?,
                    record.username,
                    record.date.format("%Y-%m-%d").to_string(),
                    record.total_seconds,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_daily_summary(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, username, date, total_seconds
                 FROM daily_summaries
                 WHERE user_id = ?1 AND date = ?2",
            )?;

            let mut rows = stmt.query(params![
                to_i64(user_id)?,
                date.format("%Y-%m-%d").to_string()
            ])?;
            let summary = match rows.next()? {
                Some(row) => {
                    let user_id: i64 = row.get(0)?;
                    let raw_date: String = row.get(2)?;
                    Some(DailySummary {
                        user_id: to_u64(user_id, "user_id")?,
                        username: row.get(1)?,
                        date: parse_date(&raw_date, "date")?,
                        total_seconds: row.get(3)?,
                    })
                }
                None => None,
            };
            Ok(summary)
        })
        .await
    }

    pub async fn delete_summaries_before(&self, cutoff: NaiveDate) -> Result<usize> {
        self.execute(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM daily_summaries WHERE date < ?1",
                params![cutoff.format("%Y-%m-%d").to_string()],
            )?;
            Ok(deleted)
        })
        .await
    }
}
