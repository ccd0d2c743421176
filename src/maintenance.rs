//! The daily maintenance job: splits every open session into a durable
//! interval without ending it, rolls up per-user daily totals, and prunes
//! old data. Scheduled by the platform's wall-clock timer; this module
//! only exposes the operation.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{error, info};

use crate::{
    config::Config,
    db::{
        models::{DailySummary, StudyInterval},
        Database,
    },
    milestones::evaluate_and_grant,
    platform::{Notifier, UserId},
    session::SessionManager,
    utils::{local_date, local_day_start},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub split_count: usize,
    pub logs_deleted: usize,
    pub summaries_deleted: usize,
}

pub struct MaintenanceJob {
    db: Database,
    sessions: Arc<SessionManager>,
    notifier: Arc<dyn Notifier>,
    config: Arc<Config>,
}

impl MaintenanceJob {
    pub fn new(
        db: Database,
        sessions: Arc<SessionManager>,
        notifier: Arc<dyn Notifier>,
        config: Arc<Config>,
    ) -> Self {
        Self { db, sessions, notifier, config }
    }

    pub async fn run_daily_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let mut split_count = 0;
        for user_id in self.sessions.live_users().await {
            match self.split_user(user_id, now).await {
                Ok(true) => split_count += 1,
                Ok(false) => {}
                // One user's failure never aborts the batch.
                Err(err) => error!("maintenance split failed for user {user_id}: {err:#}"),
            }
        }

        let tz = self.config.tz();
        let day_start = local_day_start(now, tz);
        let date = local_date(now, tz);

        match self.db.user_totals_since(day_start).await {
            Ok(totals) => {
                for (user_id, username, total_seconds) in totals {
                    let summary = DailySummary { user_id, username, date, total_seconds };
                    if let Err(err) = self.db.upsert_daily_summary(&summary).await {
                        error!("daily rollup failed for user {user_id}: {err:#}");
                    }
                }
            }
            Err(err) => error!("daily rollup query failed: {err:#}"),
        }

        let logs_deleted = self
            .db
            .delete_intervals_before(now - Duration::days(self.config.keep_log_days))
            .await?;
        let summaries_deleted = self
            .db
            .delete_summaries_before(date - Duration::days(self.config.keep_summary_days))
            .await?;
        self.db.vacuum().await?;

        info!(
            "maintenance done: {split_count} sessions split, {logs_deleted} intervals and \
             {summaries_deleted} summaries pruned"
        );

        Ok(MaintenanceReport { split_count, logs_deleted, summaries_deleted })
    }

    /// Close-and-reanchor for one user. The in-memory step is atomic; the
    /// persist happens after, so a failure here under-reports the slice
    /// rather than ever double-counting it.
    async fn split_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<bool> {
        let Some(slice) = self.sessions.split(user_id, now).await else {
            return Ok(false);
        };

        let prev_total = self.db.user_seconds_total(user_id).await?;
        let interval =
            StudyInterval::closed(user_id, &slice.username, slice.start_time, slice.elapsed, now);
        self.db.insert_interval(&interval).await?;

        evaluate_and_grant(
            self.notifier.as_ref(),
            &self.config.milestones,
            user_id,
            &slice.username,
            prev_total,
            prev_total + slice.elapsed,
        )
        .await;

        Ok(true)
    }
}
