//! Startup recovery: re-derive the live table from actual voice-channel
//! membership plus recent store entries, bridging a deliberate restart gap
//! so users mid-session see a continuous clock.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::{
    config::Config,
    db::Database,
    platform::{Notification, Notifier, PresenceSource},
    session::SessionManager,
    utils::{format_duration, local_day_start, DurationStyle},
};

pub struct RecoveryManager {
    db: Database,
    sessions: Arc<SessionManager>,
    presence: Arc<dyn PresenceSource>,
    notifier: Arc<dyn Notifier>,
    config: Arc<Config>,
}

impl RecoveryManager {
    pub fn new(
        db: Database,
        sessions: Arc<SessionManager>,
        presence: Arc<dyn PresenceSource>,
        notifier: Arc<dyn Notifier>,
        config: Arc<Config>,
    ) -> Self {
        Self { db, sessions, presence, notifier, config }
    }

    pub async fn recover_on_startup(&self) -> Result<usize> {
        self.recover_at(Utc::now()).await
    }

    pub async fn recover_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let members = self.presence.present_members().await?;
        let mut recovered = 0;

        for present in members {
            let member = &present.member;
            // Members sitting on break are not recovered; their break was
            // never billable and the next unmute opens a fresh session.
            if member.is_bot || !present.presence.is_active() {
                continue;
            }

            // The true join instant is unknowable after a restart; the
            // session restarts at now. If the store holds an interval that
            // ended just before the restart, its duration is bridged into
            // the stored offset so the displayed clock stays continuous.
            let bridged = match self.db.latest_interval(member.user_id).await {
                Ok(Some(interval))
                    if (now - interval.end_time).num_seconds()
                        <= self.config.recovery_bridge_secs =>
                {
                    interval.duration_seconds.max(0)
                }
                Ok(_) => 0,
                Err(err) => {
                    warn!("bridge lookup failed for {}: {err:#}", member.username);
                    0
                }
            };

            if self
                .sessions
                .recover(member.user_id, &member.username, now, bridged)
                .await
            {
                recovered += 1;
                info!("recovered session for {} (bridged {bridged}s)", member.username);
            }
        }

        self.close_stale_panels(now).await;

        if recovered > 0 {
            info!("recovered {recovered} open sessions");
        }
        Ok(recovered)
    }

    /// A join panel surviving the restart for a user who is no longer in
    /// voice means they left silently during downtime. Their time was
    /// already flushed by the shutdown saver, so only the display is
    /// reconciled: no interval is fabricated.
    async fn close_stale_panels(&self, now: DateTime<Utc>) {
        let states = match self.db.states_with_join_panel().await {
            Ok(states) => states,
            Err(err) => {
                warn!("stale panel scan failed: {err:#}");
                return;
            }
        };

        for state in states {
            if self.sessions.is_live(state.user_id).await {
                continue;
            }

            if let Some(panel) = state.join_panel {
                if let Err(err) = self.notifier.delete(panel).await {
                    warn!("failed to delete stale join panel {panel}: {err:#}");
                }
            }

            let (username, session_seconds) = match self.db.latest_interval(state.user_id).await {
                Ok(Some(interval)) => (interval.username, interval.duration_seconds),
                Ok(None) => (state.user_id.to_string(), 0),
                Err(err) => {
                    warn!("latest interval lookup failed for user {}: {err:#}", state.user_id);
                    (state.user_id.to_string(), 0)
                }
            };

            let day_start = local_day_start(now, self.config.tz());
            let today = match self.db.user_seconds_since(state.user_id, day_start).await {
                Ok(total) => total,
                Err(err) => {
                    warn!("today total lookup failed for user {}: {err:#}", state.user_id);
                    0
                }
            };

            let notification = Notification::Stop {
                user_id: state.user_id,
                username,
                session: format_duration(session_seconds, DurationStyle::Full),
                today_total: format_duration(today, DurationStyle::Full),
            };
            match self.notifier.post(notification).await {
                Ok(panel) => {
                    if let Err(err) = self
                        .db
                        .set_message_state(state.user_id, None, Some(panel))
                        .await
                    {
                        warn!("failed to flip message state for user {}: {err:#}", state.user_id);
                    }
                }
                Err(err) => {
                    warn!("synthetic stop notification failed for user {}: {err:#}", state.user_id);
                }
            }
        }
    }
}
