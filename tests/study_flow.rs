//! End-to-end flows through the reconciler, maintenance job, recovery
//! manager, and aggregator against a real SQLite store, with in-process
//! fakes standing in for the platform collaborators.

use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use studyhall::{
    aggregator::Aggregator,
    announcer::VoiceAnnouncer,
    config::Config,
    db::{models::StudyInterval, Database},
    maintenance::MaintenanceJob,
    platform::{
        BadgeOutcome, ChannelId, MemberInfo, MessageRef, Notification, Notifier, PresenceSource,
        PresentMember, SpeechBackend, UserId, VoicePresence,
    },
    reconciler::Reconciler,
    recovery::RecoveryManager,
    refresh::{BoardRefresher, RefreshQueue},
    service::StudyService,
    session::SessionManager,
};

const CH: ChannelId = 42;

#[derive(Default)]
struct FakeNotifier {
    next_ref: StdMutex<MessageRef>,
    posted: StdMutex<Vec<Notification>>,
    deleted: StdMutex<Vec<MessageRef>>,
    held_badges: StdMutex<Vec<(UserId, u32)>>,
}

impl FakeNotifier {
    fn posted(&self) -> Vec<Notification> {
        self.posted.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<MessageRef> {
        self.deleted.lock().unwrap().clone()
    }

    fn badges(&self) -> Vec<(UserId, u32)> {
        self.held_badges.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn post(&self, notification: Notification) -> Result<MessageRef> {
        self.posted.lock().unwrap().push(notification);
        let mut next = self.next_ref.lock().unwrap();
        *next += 1;
        Ok(*next)
    }

    async fn delete(&self, message: MessageRef) -> Result<()> {
        self.deleted.lock().unwrap().push(message);
        Ok(())
    }

    async fn grant_badge(&self, user_id: UserId, hours: u32, _badge: &str) -> Result<BadgeOutcome> {
        let mut held = self.held_badges.lock().unwrap();
        if held.contains(&(user_id, hours)) {
            return Ok(BadgeOutcome::AlreadyHeld);
        }
        held.push((user_id, hours));
        Ok(BadgeOutcome::Granted)
    }
}

struct SilentSpeech;

#[async_trait]
impl SpeechBackend for SilentSpeech {
    async fn speak(&self, _channel: ChannelId, _text: &str, _user_id: UserId) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakePresence {
    members: StdMutex<Vec<PresentMember>>,
}

#[async_trait]
impl PresenceSource for FakePresence {
    async fn present_members(&self) -> Result<Vec<PresentMember>> {
        Ok(self.members.lock().unwrap().clone())
    }
}

struct NoopRefresher;

#[async_trait]
impl BoardRefresher for NoopRefresher {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

fn test_config() -> Config {
    // UTC offset zero keeps the day math in the assertions readable.
    Config { utc_offset_secs: 0, ..Config::default() }
}

fn member(user_id: UserId, name: &str) -> MemberInfo {
    MemberInfo { user_id, username: name.to_string(), is_bot: false }
}

fn friday_9am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap()
}

struct Harness {
    _dir: TempDir,
    db: Database,
    sessions: Arc<SessionManager>,
    notifier: Arc<FakeNotifier>,
    config: Arc<Config>,
    reconciler: Reconciler,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Database::new(dir.path().join("studyhall.sqlite3")).unwrap();
    let sessions = Arc::new(SessionManager::new());
    let notifier = Arc::new(FakeNotifier::default());
    let config = Arc::new(test_config());
    let reconciler = Reconciler::new(
        db.clone(),
        sessions.clone(),
        notifier.clone(),
        VoiceAnnouncer::new(Arc::new(SilentSpeech)),
        RefreshQueue::new(),
        config.clone(),
    );
    Harness { _dir: dir, db, sessions, notifier, config, reconciler }
}

async fn interval_count(db: &Database) -> i64 {
    db.execute(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM study_intervals", [], |row| row.get(0))?)
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn pause_resume_stop_bills_exactly_the_work_time() {
    let h = harness();
    let mika = member(1, "mika");
    let t0 = friday_9am();

    h.reconciler
        .handle_transition(&mika, VoicePresence::disconnected(), VoicePresence::active(CH), t0)
        .await;
    h.reconciler
        .handle_transition(
            &mika,
            VoicePresence::active(CH),
            VoicePresence::muted(CH),
            t0 + Duration::minutes(10),
        )
        .await;
    h.reconciler
        .handle_transition(
            &mika,
            VoicePresence::muted(CH),
            VoicePresence::active(CH),
            t0 + Duration::minutes(15),
        )
        .await;
    h.reconciler
        .handle_transition(
            &mika,
            VoicePresence::active(CH),
            VoicePresence::disconnected(),
            t0 + Duration::minutes(40),
        )
        .await;

    // Exactly one interval: 10 + 25 minutes billed, the 5-minute break
    // excluded.
    assert_eq!(interval_count(&h.db).await, 1);
    let latest = h.db.latest_interval(1).await.unwrap().unwrap();
    assert_eq!(latest.duration_seconds, 2100);
    assert_eq!(latest.start_time, t0 + Duration::minutes(15));
    assert_eq!(latest.end_time, t0 + Duration::minutes(40));

    assert!(!h.sessions.is_live(1).await);
    assert!(!h.sessions.is_on_break(1).await);
    assert_eq!(h.sessions.offset(1).await, Default::default());

    let kinds: Vec<&'static str> = h
        .notifier
        .posted()
        .iter()
        .map(|n| match n {
            Notification::Join { .. } => "join",
            Notification::Pause { .. } => "pause",
            Notification::Resume { .. } => "resume",
            Notification::Stop { .. } => "stop",
            Notification::Milestone { .. } => "milestone",
        })
        .collect();
    assert_eq!(kinds, vec!["join", "pause", "resume", "stop"]);

    // The pause panel went at resume, the join panel at stop.
    assert_eq!(h.notifier.deleted(), vec![2, 1]);
}

#[tokio::test]
async fn redelivered_events_do_not_move_the_clock() {
    let h = harness();
    let mika = member(1, "mika");
    let t0 = friday_9am();
    let join = (VoicePresence::disconnected(), VoicePresence::active(CH));

    h.reconciler.handle_transition(&mika, join.0, join.1, t0).await;
    h.reconciler
        .handle_transition(&mika, join.0, join.1, t0 + Duration::minutes(5))
        .await;
    assert_eq!(
        h.sessions.elapsed_display(1, t0 + Duration::minutes(10)).await,
        Some(600)
    );

    let pause = (VoicePresence::active(CH), VoicePresence::muted(CH));
    h.reconciler
        .handle_transition(&mika, pause.0, pause.1, t0 + Duration::minutes(10))
        .await;
    h.reconciler
        .handle_transition(&mika, pause.0, pause.1, t0 + Duration::minutes(12))
        .await;
    assert_eq!(h.sessions.offset(1).await.unbilled, 600);
    assert!(h.sessions.is_on_break(1).await);
}

#[tokio::test]
async fn unmuting_after_joining_muted_starts_a_session() {
    let h = harness();
    let mika = member(1, "mika");
    let t0 = friday_9am();

    // Joining muted matches no transition row.
    h.reconciler
        .handle_transition(&mika, VoicePresence::disconnected(), VoicePresence::muted(CH), t0)
        .await;
    assert!(!h.sessions.is_live(1).await);

    // The unmute classifies as Resume but there is no break to close, so
    // a fresh session opens.
    h.reconciler
        .handle_transition(
            &mika,
            VoicePresence::muted(CH),
            VoicePresence::active(CH),
            t0 + Duration::minutes(3),
        )
        .await;
    assert!(h.sessions.is_live(1).await);
    assert_eq!(
        h.sessions.elapsed_display(1, t0 + Duration::minutes(13)).await,
        Some(600)
    );
}

#[tokio::test]
async fn weekly_ranking_reflects_live_sessions() {
    let h = harness();
    let aggregator = Aggregator::new(h.db.clone(), h.sessions.clone(), h.config.clone());
    let t0 = friday_9am();

    // rin closed an hour earlier this week; mika is mid-session.
    h.db.insert_interval(&StudyInterval::closed(
        2,
        "rin",
        t0 - Duration::hours(2),
        3600,
        t0 - Duration::hours(1),
    ))
    .await
    .unwrap();
    h.reconciler
        .handle_transition(
            &member(1, "mika"),
            VoicePresence::disconnected(),
            VoicePresence::active(CH),
            t0,
        )
        .await;

    let ranking = aggregator.weekly_ranking(t0 + Duration::minutes(30)).await.unwrap();
    assert_eq!(ranking.len(), 2);
    assert_eq!(ranking[0].username, "rin");
    assert_eq!(ranking[0].total_seconds, 3600);
    assert_eq!(ranking[1].username, "mika");
    assert_eq!(ranking[1].total_seconds, 1800);

    let server_total = aggregator
        .daily_server_total(t0 + Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(server_total, 3600 + 1800);
}

#[tokio::test]
async fn streak_counts_today_and_consecutive_days_back() {
    let h = harness();
    let aggregator = Aggregator::new(h.db.clone(), h.sessions.clone(), h.config.clone());
    let now = friday_9am();

    let log_at = |days_back: i64| {
        let end = now - Duration::days(days_back) - Duration::hours(1);
        StudyInterval::closed(1, "mika", end - Duration::hours(1), 3600, end)
    };

    // Logged today, yesterday, and two days ago; gap at three days ago.
    h.db.insert_interval(&log_at(0)).await.unwrap();
    h.db.insert_interval(&log_at(1)).await.unwrap();
    h.db.insert_interval(&log_at(2)).await.unwrap();
    h.db.insert_interval(&log_at(4)).await.unwrap();
    assert_eq!(aggregator.user_streak(1, now).await.unwrap(), 3);

    // No log yet today but one yesterday: joining now counts today as a
    // fresh day one.
    h.db.insert_interval(&StudyInterval::closed(
        2,
        "rin",
        now - Duration::days(1),
        3600,
        now - Duration::days(1),
    ))
    .await
    .unwrap();
    assert_eq!(aggregator.user_streak(2, now).await.unwrap(), 2);

    // Nothing logged at all.
    assert_eq!(aggregator.user_streak(3, now).await.unwrap(), 1);
}

#[tokio::test]
async fn maintenance_splits_without_disturbing_the_display() {
    let h = harness();
    let job = MaintenanceJob::new(
        h.db.clone(),
        h.sessions.clone(),
        h.notifier.clone(),
        h.config.clone(),
    );
    let mika = member(1, "mika");
    let t0 = friday_9am();

    h.reconciler
        .handle_transition(&mika, VoicePresence::disconnected(), VoicePresence::active(CH), t0)
        .await;

    // Data due for pruning.
    h.db.insert_interval(&StudyInterval::closed(
        9,
        "old",
        t0 - Duration::days(40),
        1200,
        t0 - Duration::days(40),
    ))
    .await
    .unwrap();
    h.db.upsert_daily_summary(&studyhall::db::models::DailySummary {
        user_id: 9,
        username: "old".to_string(),
        date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        total_seconds: 1200,
    })
    .await
    .unwrap();

    let run_at = t0 + Duration::hours(1);
    let display_before = h.sessions.elapsed_display(1, run_at).await.unwrap();
    let report = job.run_daily_maintenance(run_at).await.unwrap();
    let display_after = h.sessions.elapsed_display(1, run_at).await.unwrap();

    assert_eq!(report.split_count, 1);
    assert_eq!(report.logs_deleted, 1);
    assert_eq!(report.summaries_deleted, 1);
    assert_eq!(display_before, display_after);

    // The split slice is durable and rolled up, and the session is still
    // open.
    assert_eq!(h.db.user_seconds_total(1).await.unwrap(), 3600);
    let summary = h
        .db
        .get_daily_summary(1, NaiveDate::from_ymd_opt(2026, 8, 7).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.total_seconds, 3600);
    assert!(h.sessions.is_live(1).await);

    // A later stop bills only the post-split remainder.
    h.reconciler
        .handle_transition(
            &mika,
            VoicePresence::active(CH),
            VoicePresence::disconnected(),
            run_at + Duration::minutes(30),
        )
        .await;
    assert_eq!(h.db.user_seconds_total(1).await.unwrap(), 3600 + 1800);
}

#[tokio::test]
async fn recovery_bridges_recent_intervals_and_closes_stale_panels() {
    let h = harness();
    let presence = Arc::new(FakePresence::default());
    let recovery = RecoveryManager::new(
        h.db.clone(),
        h.sessions.clone(),
        presence.clone(),
        h.notifier.clone(),
        h.config.clone(),
    );
    let now = friday_9am();

    // mika's session was flushed five minutes ago by the shutdown saver.
    h.db.insert_interval(&StudyInterval::closed(
        1,
        "mika",
        now - Duration::minutes(35),
        1800,
        now - Duration::minutes(5),
    ))
    .await
    .unwrap();
    // User 99 still shows a join panel but is gone from voice.
    h.db.set_message_state(99, Some(77), None).await.unwrap();

    *presence.members.lock().unwrap() = vec![
        PresentMember { member: member(1, "mika"), presence: VoicePresence::active(CH) },
        PresentMember { member: member(2, "rin"), presence: VoicePresence::muted(CH) },
        PresentMember {
            member: MemberInfo { user_id: 3, username: "bot".to_string(), is_bot: true },
            presence: VoicePresence::active(CH),
        },
    ];

    let recovered = recovery.recover_at(now).await.unwrap();
    assert_eq!(recovered, 1);

    // The bridge keeps mika's clock continuous without rewinding the start.
    assert_eq!(h.sessions.elapsed_display(1, now + Duration::minutes(10)).await, Some(600 + 1800));
    // Break members are not recovered.
    assert!(!h.sessions.is_live(2).await);
    assert!(!h.sessions.is_on_break(2).await);

    // The stale panel was deleted and flipped to a leave panel.
    assert!(h.notifier.deleted().contains(&77));
    let state = h.db.get_message_state(99).await.unwrap().unwrap();
    assert!(state.join_panel.is_none());
    assert!(state.leave_panel.is_some());
    assert!(h
        .notifier
        .posted()
        .iter()
        .any(|n| matches!(n, Notification::Stop { user_id: 99, .. })));
}

#[tokio::test]
async fn service_surface_smoke() {
    let dir = TempDir::new().unwrap();
    let notifier = Arc::new(FakeNotifier::default());
    let service = StudyService::new(
        test_config(),
        dir.path().join("studyhall.sqlite3"),
        Arc::new(FakePresence::default()),
        notifier.clone(),
        Arc::new(SilentSpeech),
        Arc::new(NoopRefresher),
    )
    .unwrap();
    let mika = member(1, "mika");

    service
        .on_presence_change(&mika, VoicePresence::disconnected(), VoicePresence::active(CH))
        .await;
    assert!(service.sessions().is_live(1).await);

    let saved = service.save_all_open_sessions_on_shutdown().await;
    assert_eq!(saved, 1);
    assert!(service.sessions().live_users().await.is_empty());

    // A 59-hour correction from zero crosses the 10h and 50h badges only.
    let today = service.add_correction(1, "mika", 59 * 60).await.unwrap();
    assert!(today >= 59 * 3600);
    assert_eq!(notifier.badges(), vec![(1, 10), (1, 50)]);

    assert!(service.get_user_streak(1).await.unwrap() >= 1);
    assert!(service
        .get_weekly_ranking()
        .await
        .unwrap()
        .iter()
        .any(|entry| entry.username == "mika"));
    assert!(service.get_daily_server_total().await.unwrap() >= 59 * 3600);

    service.set_user_task(1, Some("thesis".to_string())).await.unwrap();
    assert_eq!(service.get_user_task(1).await.unwrap().as_deref(), Some("thesis"));
    service.set_reading_alias(1, Some("mee-ka".to_string())).await.unwrap();
    assert_eq!(service.get_reading_alias(1).await.unwrap().as_deref(), Some("mee-ka"));

    service.shutdown().await;
}
