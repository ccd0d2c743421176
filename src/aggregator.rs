//! Read-only queries over the store combined with the live table, so
//! boards reflect in-flight sessions without waiting for a Stop.

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::{
    config::Config,
    db::Database,
    platform::UserId,
    session::SessionManager,
    utils::{local_date, local_day_start, local_week_start},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingEntry {
    pub username: String,
    pub total_seconds: i64,
}

pub struct Aggregator {
    db: Database,
    sessions: Arc<SessionManager>,
    config: Arc<Config>,
}

impl Aggregator {
    pub fn new(db: Database, sessions: Arc<SessionManager>, config: Arc<Config>) -> Self {
        Self { db, sessions, config }
    }

    /// Stored totals since local Monday 00:00 with live sessions folded
    /// into their display-name buckets, largest first.
    pub async fn weekly_ranking(&self, now: DateTime<Utc>) -> Result<Vec<RankingEntry>> {
        let monday = local_week_start(now, self.config.tz());
        let rows = self.db.user_totals_since(monday).await?;

        let mut totals: HashMap<String, i64> = HashMap::new();
        for (_, username, total_seconds) in rows {
            *totals.entry(username).or_insert(0) += total_seconds;
        }
        for live in self.sessions.live_snapshot().await {
            let elapsed = live.elapsed_unstored(now);
            if elapsed > 0 {
                *totals.entry(live.username).or_insert(0) += elapsed;
            }
        }

        let mut ranking: Vec<RankingEntry> = totals
            .into_iter()
            .map(|(username, total_seconds)| RankingEntry { username, total_seconds })
            .collect();
        ranking.sort_by(|a, b| {
            b.total_seconds
                .cmp(&a.total_seconds)
                .then_with(|| a.username.cmp(&b.username))
        });
        ranking.truncate(self.config.ranking_top_n);

        Ok(ranking)
    }

    /// Today's stored seconds across all users plus every live session's
    /// not-yet-stored elapsed.
    pub async fn daily_server_total(&self, now: DateTime<Utc>) -> Result<i64> {
        let day_start = local_day_start(now, self.config.tz());
        let stored = self.db.server_seconds_since(day_start).await?;

        let mut live_total = 0;
        for live in self.sessions.live_snapshot().await {
            live_total += live.elapsed_unstored(now).max(0);
        }

        Ok(stored + live_total)
    }

    /// Consecutive calendar days with logged time, counting back from
    /// today. Today counts as day one even without a log yet, since the
    /// caller is asking mid-day (typically at join time).
    pub async fn user_streak(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u32> {
        let tz = self.config.tz();
        let times = self.db.interval_created_times(user_id).await?;

        // Newest-first stamps collapse to distinct local days.
        let mut days: Vec<NaiveDate> = Vec::new();
        for time in times {
            let day = local_date(time, tz);
            if days.last() != Some(&day) {
                days.push(day);
            }
        }

        let today = local_date(now, tz);
        let mut streak = 1;
        let mut expected = today - Duration::days(1);
        for day in days {
            if day >= today {
                continue;
            }
            if day == expected {
                streak += 1;
                expected = expected - Duration::days(1);
            } else {
                break;
            }
        }

        Ok(streak)
    }
}
