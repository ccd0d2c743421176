//! The presence reconciler: turns raw voice-presence transitions into
//! live-table mutations and closed intervals. This is the only writer of
//! StudyIntervals in the event path; the maintenance job is the other.

pub mod transition;

pub use transition::{classify, TransitionKind};

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};

use crate::{
    announcer::{Announcement, VoiceAnnouncer},
    config::Config,
    db::{models::StudyInterval, Database},
    milestones::evaluate_and_grant,
    platform::{MemberInfo, Notification, Notifier, UserId, VoicePresence},
    refresh::RefreshQueue,
    session::SessionManager,
    utils::{format_duration, local_day_start, DurationStyle},
};

enum PanelKind {
    Join,
    Leave,
}

pub struct Reconciler {
    db: Database,
    sessions: Arc<SessionManager>,
    notifier: Arc<dyn Notifier>,
    announcer: VoiceAnnouncer,
    refresh: RefreshQueue,
    config: Arc<Config>,
}

impl Reconciler {
    pub fn new(
        db: Database,
        sessions: Arc<SessionManager>,
        notifier: Arc<dyn Notifier>,
        announcer: VoiceAnnouncer,
        refresh: RefreshQueue,
        config: Arc<Config>,
    ) -> Self {
        Self { db, sessions, notifier, announcer, refresh, config }
    }

    /// Platform callback entry point. Never returns an error: a throwing
    /// handler must not crash the event-delivery loop.
    pub async fn on_presence_change(
        &self,
        member: &MemberInfo,
        before: VoicePresence,
        after: VoicePresence,
    ) {
        self.handle_transition(member, before, after, Utc::now()).await;
    }

    pub async fn handle_transition(
        &self,
        member: &MemberInfo,
        before: VoicePresence,
        after: VoicePresence,
        now: DateTime<Utc>,
    ) {
        if member.is_bot {
            return;
        }
        let Some(kind) = classify(&before, &after) else {
            return;
        };

        let result = match kind {
            TransitionKind::Join => self.handle_join(member, after, now).await,
            TransitionKind::Resume => self.handle_resume(member, after, now).await,
            TransitionKind::Pause => self.handle_pause(member, now).await,
            TransitionKind::Stop => self.handle_stop(member, now).await,
        };

        if let Err(err) = result {
            error!("{kind:?} handling failed for {}: {err:#}", member.username);
        }

        self.refresh.request();
    }

    async fn handle_join(
        &self,
        member: &MemberInfo,
        after: VoicePresence,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.sessions.begin(member.user_id, &member.username, now).await {
            debug!("redelivered join for {} ignored", member.username);
            return Ok(());
        }

        self.delete_stale_panel(member.user_id, PanelKind::Leave).await;

        let day_start = local_day_start(now, self.config.tz());
        let today = self.db.user_seconds_since(member.user_id, day_start).await?;

        let panel = self
            .notifier
            .post(Notification::Join {
                user_id: member.user_id,
                username: member.username.clone(),
                today_total: format_duration(today, DurationStyle::Full),
            })
            .await?;
        self.db.set_message_state(member.user_id, Some(panel), None).await?;

        if let Some(channel) = after.channel {
            let spoken_name = self.spoken_name(member).await;
            let text = if today > 0 {
                format!(
                    "{spoken_name} started working. {} logged today.",
                    format_duration(today, DurationStyle::Compact)
                )
            } else {
                format!("{spoken_name} started working.")
            };
            self.announcer
                .enqueue(channel, Announcement { user_id: member.user_id, text })
                .await;
        }

        Ok(())
    }

    async fn handle_resume(
        &self,
        member: &MemberInfo,
        after: VoicePresence,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(info) = self.sessions.resume(member.user_id, now).await else {
            // No break to close: the user connected muted earlier and this
            // unmute is their first activity, so it opens a fresh session.
            return self.handle_join(member, after, now).await;
        };

        if let Some(panel) = info.pause_panel {
            if let Err(err) = self.notifier.delete(panel).await {
                warn!("failed to delete pause panel for {}: {err:#}", member.username);
            }
        }

        self.notifier
            .post(Notification::Resume {
                user_id: member.user_id,
                username: member.username.clone(),
            })
            .await?;

        Ok(())
    }

    async fn handle_pause(&self, member: &MemberInfo, now: DateTime<Utc>) -> Result<()> {
        let Some(session_so_far) = self.sessions.pause(member.user_id, now).await else {
            debug!("redelivered pause for {} ignored", member.username);
            return Ok(());
        };

        // The join panel stays up; only a pause panel is added.
        let panel = self
            .notifier
            .post(Notification::Pause {
                user_id: member.user_id,
                username: member.username.clone(),
                session_so_far: format_duration(session_so_far, DurationStyle::Full),
            })
            .await?;
        self.sessions.set_pause_panel(member.user_id, panel).await;

        Ok(())
    }

    async fn handle_stop(&self, member: &MemberInfo, now: DateTime<Utc>) -> Result<()> {
        self.delete_stale_panel(member.user_id, PanelKind::Join).await;

        let stop = self.sessions.stop(member.user_id, now).await;
        let display_seconds = stop.as_ref().map(|s| s.display_seconds).unwrap_or(0);

        if let Some(stop) = &stop {
            if let Some(panel) = stop.pause_panel {
                if let Err(err) = self.notifier.delete(panel).await {
                    warn!("failed to delete pause panel for {}: {err:#}", member.username);
                }
            }

            if stop.had_live || stop.session_seconds > 0 {
                let prev_total = self.db.user_seconds_total(member.user_id).await?;
                let interval = StudyInterval::closed(
                    member.user_id,
                    &stop.username,
                    stop.start_time,
                    stop.session_seconds,
                    now,
                );
                self.db.insert_interval(&interval).await?;
                evaluate_and_grant(
                    self.notifier.as_ref(),
                    &self.config.milestones,
                    member.user_id,
                    &stop.username,
                    prev_total,
                    prev_total + stop.session_seconds,
                )
                .await;
            }
        }

        let day_start = local_day_start(now, self.config.tz());
        let today = self.db.user_seconds_since(member.user_id, day_start).await?;

        let panel = self
            .notifier
            .post(Notification::Stop {
                user_id: member.user_id,
                username: member.username.clone(),
                session: format_duration(display_seconds, DurationStyle::Full),
                today_total: format_duration(today, DurationStyle::Full),
            })
            .await?;
        self.db.set_message_state(member.user_id, None, Some(panel)).await?;

        Ok(())
    }

    async fn spoken_name(&self, member: &MemberInfo) -> String {
        match self.db.get_user_prefs(member.user_id).await {
            Ok(Some(prefs)) => prefs.reading_alias.unwrap_or_else(|| member.username.clone()),
            Ok(None) => member.username.clone(),
            Err(err) => {
                warn!("prefs lookup failed for {}: {err:#}", member.username);
                member.username.clone()
            }
        }
    }

    async fn delete_stale_panel(&self, user_id: UserId, kind: PanelKind) {
        let state = match self.db.get_message_state(user_id).await {
            Ok(state) => state,
            Err(err) => {
                warn!("message state lookup failed for user {user_id}: {err:#}");
                return;
            }
        };
        let Some(state) = state else {
            return;
        };
        let panel = match kind {
            PanelKind::Join => state.join_panel,
            PanelKind::Leave => state.leave_panel,
        };
        if let Some(panel) = panel {
            if let Err(err) = self.notifier.delete(panel).await {
                warn!("failed to delete stale panel {panel}: {err:#}");
            }
        }
    }
}
