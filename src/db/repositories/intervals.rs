use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_i64, to_u64},
    models::StudyInterval,
};
use crate::platform::UserId;

fn row_to_interval(row: &Row) -> Result<StudyInterval> {
    let user_id: i64 = row.get("user_id")?;
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let created_at: String = row.get("created_at")?;

    Ok(StudyInterval {
        id: row.get("id")?,
        user_id: to_u64(user_id, "user_id")?,
        username: row.get("username")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        duration_seconds: row.get("duration_seconds")?,
        end_time: parse_datetime(&end_time, "end_time")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    pub async fn insert_interval(&self, interval: &StudyInterval) -> Result<()> {
        let record = interval.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO study_intervals (id, user_id, username, start_time, duration_seconds, end_time, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    to_i64(record.user_id)?,
                    record.username,
                    record.start_time.to_rfc3339(),
                    record.duration_seconds,
                    record.end_time.to_rfc3339(),
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Sum of a user's billed seconds with `created_at >= since`.
    pub async fn user_seconds_since(&self, user_id: UserId, since: DateTime<Utc>) -> Result<i64> {
        self.execute(move |conn| {
            let total: Option<i64> = conn.query_row(
                "SELECT SUM(duration_seconds) FROM study_intervals
                 WHERE user_id = ?1 AND created_at >= ?2",
                params![to_i64(user_id)?, since.to_rfc3339()],
                |row| row.get(0),
            )?;
            Ok(total.unwrap_or(0))
        })
        .await
    }

    /// A user's all-time billed seconds (within the retention window).
    pub async fn user_seconds_total(&self, user_id: UserId) -> Result<i64> {
        self.execute(move |conn| {
            let total: Option<i64> = conn.query_row(
                "SELECT SUM(duration_seconds) FROM study_intervals WHERE user_id = ?1",
                params![to_i64(user_id)?],
                |row| row.get(0),
            )?;
            Ok(total.unwrap_or(0))
        })
        .await
    }

    /// Sum of everyone's billed seconds with `created_at >= since`.
    pub async fn server_seconds_since(&self, since: DateTime<Utc>) -> Result<i64> {
        self.execute(move |conn| {
            let total: Option<i64> = conn.query_row(
                "SELECT SUM(duration_seconds) FROM study_intervals WHERE created_at >= ?1",
                params![since.to_rfc3339()],
                |row| row.get(0),
            )?;
            Ok(total.unwrap_or(0))
        })
        .await
    }

    /// Per-user billed totals with `created_at >= since`, largest first.
    /// The username column carries the most recent snapshot SQLite picks
    /// for the group, which is good enough for display.
    pub async fn user_totals_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(UserId, String, i64)>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, username, SUM(duration_seconds) AS total_seconds
                 FROM study_intervals
                 WHERE created_at >= ?1
                 GROUP BY user_id
                 ORDER BY total_seconds DESC",
            )?;

            let mut rows = stmt.query(params![since.to_rfc3339()])?;
            let mut totals = Vec::new();
            while let Some(row) = rows.next()? {
                let user_id: i64 = row.get(0)?;
                totals.push((to_u64(user_id, "user_id")?, row.get(1)?, row.get(2)?));
            }

            Ok(totals)
        })
        .await
    }

    /// The user's most recently ended interval, if any.
    pub async fn latest_interval(&self, user_id: UserId) -> Result<Option<StudyInterval>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, username, start_time, duration_seconds, end_time, created_at
                 FROM study_intervals
                 WHERE user_id = ?1
                 ORDER BY end_time DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query(params![to_i64(user_id)?])?;
            let interval = match rows.next()? {
                Some(row) => Some(row_to_interval(row)?),
                None => None,
            };
            Ok(interval)
        })
        .await
    }

    /// `created_at` stamps for a user's intervals, newest first. Streak
    /// derivation collapses these into local calendar days.
    pub async fn interval_created_times(&self, user_id: UserId) -> Result<Vec<DateTime<Utc>>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT created_at FROM study_intervals
                 WHERE user_id = ?1
                 ORDER BY created_at DESC",
            )?;

            let mut rows = stmt.query(params![to_i64(user_id)?])?;
            let mut times = Vec::new();
            while let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                times.push(parse_datetime(&raw, "created_at")?);
            }
            Ok(times)
        })
        .await
    }

    pub async fn delete_intervals_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM study_intervals WHERE created_at < ?1",
                params![cutoff.to_rfc3339()],
            )?;
            Ok(deleted)
        })
        .await
    }

    pub async fn vacuum(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("VACUUM", [])?;
            Ok(())
        })
        .await
    }
}
