//! Top-level wiring: owns the store, the live table, and the background
//! workers, and exposes the call surface the platform adapter drives.
//! Construct inside a tokio runtime; the refresh worker is spawned here.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info};
use tokio::sync::Mutex;

use crate::{
    aggregator::{Aggregator, RankingEntry},
    announcer::VoiceAnnouncer,
    config::Config,
    db::{models::StudyInterval, Database},
    maintenance::{MaintenanceJob, MaintenanceReport},
    milestones::evaluate_and_grant,
    platform::{MemberInfo, Notifier, PresenceSource, SpeechBackend, UserId, VoicePresence},
    reconciler::Reconciler,
    recovery::RecoveryManager,
    refresh::{spawn_refresh_worker, BoardRefresher, RefreshQueue, RefreshWorker},
    session::SessionManager,
    utils::local_day_start,
};

pub struct StudyService {
    config: Arc<Config>,
    db: Database,
    sessions: Arc<SessionManager>,
    notifier: Arc<dyn Notifier>,
    reconciler: Reconciler,
    recovery: RecoveryManager,
    maintenance: MaintenanceJob,
    aggregator: Aggregator,
    announcer: VoiceAnnouncer,
    refresh: RefreshQueue,
    refresh_worker: Mutex<Option<RefreshWorker>>,
}

impl StudyService {
    pub fn new(
        config: Config,
        db_path: PathBuf,
        presence: Arc<dyn PresenceSource>,
        notifier: Arc<dyn Notifier>,
        speech: Arc<dyn SpeechBackend>,
        refresher: Arc<dyn BoardRefresher>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let db = Database::new(db_path)?;
        let sessions = Arc::new(SessionManager::new());
        let announcer = VoiceAnnouncer::new(speech);
        let refresh = RefreshQueue::new();
        let refresh_worker = spawn_refresh_worker(
            &refresh,
            refresher,
            Duration::from_secs(config.refresh_cooldown_secs),
        );

        let reconciler = Reconciler::new(
            db.clone(),
            sessions.clone(),
            notifier.clone(),
            announcer.clone(),
            refresh.clone(),
            config.clone(),
        );
        let recovery = RecoveryManager::new(
            db.clone(),
            sessions.clone(),
            presence,
            notifier.clone(),
            config.clone(),
        );
        let maintenance =
            MaintenanceJob::new(db.clone(), sessions.clone(), notifier.clone(), config.clone());
        let aggregator = Aggregator::new(db.clone(), sessions.clone(), config.clone());

        Ok(Self {
            config,
            db,
            sessions,
            notifier,
            reconciler,
            recovery,
            maintenance,
            aggregator,
            announcer,
            refresh,
            refresh_worker: Mutex::new(Some(refresh_worker)),
        })
    }

    pub async fn on_presence_change(
        &self,
        member: &MemberInfo,
        before: VoicePresence,
        after: VoicePresence,
    ) {
        self.reconciler.on_presence_change(member, before, after).await;
    }

    pub async fn recover_on_startup(&self) -> Result<usize> {
        self.recovery.recover_on_startup().await
    }

    pub async fn run_daily_maintenance(&self, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        self.maintenance.run_daily_maintenance(now).await
    }

    /// Flush every open session into the store with the current time as
    /// the end. Losing true end-time precision here is the accepted price
    /// of durability at process exit.
    pub async fn save_all_open_sessions_on_shutdown(&self) -> usize {
        let now = Utc::now();
        let flushed = self.sessions.drain_for_shutdown(now).await;
        let mut saved = 0;

        for stop in flushed {
            let interval = StudyInterval::closed(
                stop.user_id,
                &stop.username,
                stop.start_time,
                stop.session_seconds,
                now,
            );
            match self.db.insert_interval(&interval).await {
                Ok(()) => saved += 1,
                Err(err) => {
                    error!("failed to flush open session for {}: {err:#}", stop.username)
                }
            }
        }

        if saved > 0 {
            info!("flushed {saved} open sessions at shutdown");
        }
        saved
    }

    pub async fn get_user_streak(&self, user_id: UserId) -> Result<u32> {
        self.aggregator.user_streak(user_id, Utc::now()).await
    }

    pub async fn get_weekly_ranking(&self) -> Result<Vec<RankingEntry>> {
        self.aggregator.weekly_ranking(Utc::now()).await
    }

    pub async fn get_daily_server_total(&self) -> Result<i64> {
        self.aggregator.daily_server_total(Utc::now()).await
    }

    /// Manual time correction in minutes (negative subtracts). Returns the
    /// user's new today-total in seconds.
    pub async fn add_correction(
        &self,
        user_id: UserId,
        username: &str,
        minutes: i64,
    ) -> Result<i64> {
        let now = Utc::now();
        let seconds = minutes * 60;

        let prev_total = self.db.user_seconds_total(user_id).await?;
        let interval = StudyInterval::closed(user_id, username, now, seconds, now);
        self.db.insert_interval(&interval).await?;
        evaluate_and_grant(
            self.notifier.as_ref(),
            &self.config.milestones,
            user_id,
            username,
            prev_total,
            prev_total + seconds,
        )
        .await;

        self.refresh.request();
        self.db
            .user_seconds_since(user_id, local_day_start(now, self.config.tz()))
            .await
    }

    pub async fn get_user_task(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.db.get_user_prefs(user_id).await?.and_then(|prefs| prefs.task_text))
    }

    pub async fn set_user_task(&self, user_id: UserId, task: Option<String>) -> Result<()> {
        self.db.set_user_task(user_id, task).await
    }

    pub async fn get_reading_alias(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.db.get_user_prefs(user_id).await?.and_then(|prefs| prefs.reading_alias))
    }

    pub async fn set_reading_alias(&self, user_id: UserId, alias: Option<String>) -> Result<()> {
        self.db.set_reading_alias(user_id, alias).await
    }

    pub fn request_board_refresh(&self) {
        self.refresh.request();
    }

    /// Stop the background workers. Call after the final
    /// `save_all_open_sessions_on_shutdown`.
    pub async fn shutdown(&self) {
        if let Some(worker) = self.refresh_worker.lock().await.take() {
            worker.shutdown().await;
        }
        self.announcer.shutdown().await;
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}
