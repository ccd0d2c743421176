//! The live session table: volatile per-user state for sessions that have
//! not been persisted yet. One manager owns three keyed maps (live starts,
//! carried offsets, break markers) behind a single lock; every mutating
//! method is one lock block with no suspension point, so reconciler
//! callbacks and the maintenance job can interleave without observing
//! half-applied state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::platform::{MessageRef, UserId};

#[derive(Debug, Clone)]
pub struct LiveEntry {
    pub username: String,
    pub started_at: DateTime<Utc>,
}

/// Seconds that belong to the displayed session but are no longer covered
/// by the live start instant. `unbilled` is pause carry-forward that the
/// next Stop still has to persist; `stored` is already in the store
/// (maintenance split, restart bridge) and is display-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Offset {
    pub unbilled: i64,
    pub stored: i64,
}

impl Offset {
    pub fn display(&self) -> i64 {
        self.unbilled + self.stored
    }
}

#[derive(Debug, Clone)]
struct BreakEntry {
    username: String,
    started_at: DateTime<Utc>,
    pause_panel: Option<MessageRef>,
}

#[derive(Default)]
struct SessionTable {
    live: HashMap<UserId, LiveEntry>,
    offsets: HashMap<UserId, Offset>,
    breaks: HashMap<UserId, BreakEntry>,
    /// Total break seconds per open session. Never billed; cleared on stop.
    break_accum: HashMap<UserId, i64>,
}

#[derive(Debug, Clone)]
pub struct ResumeInfo {
    pub pause_panel: Option<MessageRef>,
    pub break_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct StopInfo {
    pub user_id: UserId,
    pub username: String,
    /// Live start instant, or `now` when the session closed out of a break
    /// and the true start was already folded away.
    pub start_time: DateTime<Utc>,
    /// The newly-accrued slice a Stop persists.
    pub session_seconds: i64,
    /// What the user sees: the slice plus already-stored carry.
    pub display_seconds: i64,
    pub break_seconds: i64,
    pub pause_panel: Option<MessageRef>,
    pub had_live: bool,
}

#[derive(Debug, Clone)]
pub struct SplitSlice {
    pub username: String,
    pub start_time: DateTime<Utc>,
    pub elapsed: i64,
}

#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    pub user_id: UserId,
    pub username: String,
    pub started_at: DateTime<Utc>,
    pub offset: Offset,
}

impl LiveSnapshot {
    pub fn elapsed_display(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds().max(0) + self.offset.display()
    }

    /// Live seconds not yet reflected in the store. Aggregates add this to
    /// stored sums; adding the stored offset too would double-count
    /// maintenance-split slices.
    pub fn elapsed_unstored(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds().max(0) + self.offset.unbilled
    }
}

#[derive(Default)]
pub struct SessionManager {
    table: Mutex<SessionTable>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a live session at `now`. Returns false when the user is
    /// already live (redelivered event) so callers can skip side effects.
    pub async fn begin(&self, user_id: UserId, username: &str, now: DateTime<Utc>) -> bool {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        if table.live.contains_key(&user_id) {
            return false;
        }
        // A leftover break here means the platform dropped a transition;
        // the break was never billable, so it is simply discarded.
        table.breaks.remove(&user_id);
        table.break_accum.remove(&user_id);
        table.offsets.remove(&user_id);
        table.live.insert(
            user_id,
            LiveEntry { username: username.to_string(), started_at: now },
        );
        true
    }

    /// Fold the running slice into the unbilled offset and mark the user
    /// on break. Returns the session-so-far display seconds, or None when
    /// the user is not live (redelivered event).
    pub async fn pause(&self, user_id: UserId, now: DateTime<Utc>) -> Option<i64> {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        let live = table.live.remove(&user_id)?;
        let elapsed = (now - live.started_at).num_seconds().max(0);
        let offset = table.offsets.entry(user_id).or_default();
        offset.unbilled += elapsed;
        let session_so_far = offset.display();
        table.breaks.insert(
            user_id,
            BreakEntry { username: live.username, started_at: now, pause_panel: None },
        );
        Some(session_so_far)
    }

    pub async fn set_pause_panel(&self, user_id: UserId, panel: MessageRef) {
        if let Some(entry) = self.table.lock().await.breaks.get_mut(&user_id) {
            entry.pause_panel = Some(panel);
        }
    }

    /// Close the break and reopen a live session at `now`. Break time is
    /// folded into the per-session accumulator and never billed.
    pub async fn resume(&self, user_id: UserId, now: DateTime<Utc>) -> Option<ResumeInfo> {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        let brk = table.breaks.remove(&user_id)?;
        let break_elapsed = (now - brk.started_at).num_seconds().max(0);
        let accum = table.break_accum.entry(user_id).or_insert(0);
        *accum += break_elapsed;
        let break_seconds = *accum;
        table.live.insert(
            user_id,
            LiveEntry { username: brk.username, started_at: now },
        );
        Some(ResumeInfo { pause_panel: brk.pause_panel, break_seconds })
    }

    /// Close everything the user has open and return the slice to persist.
    /// None when the user was not tracked at all.
    pub async fn stop(&self, user_id: UserId, now: DateTime<Utc>) -> Option<StopInfo> {
        let mut guard = self.table.lock().await;
        close_user(&mut guard, user_id, now)
    }

    /// Maintenance split: take the elapsed slice and re-anchor the live
    /// start at `now`, moving the slice into the stored offset. One atomic
    /// step; the displayed elapsed time is identical before and after.
    pub async fn split(&self, user_id: UserId, now: DateTime<Utc>) -> Option<SplitSlice> {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        let live = table.live.get_mut(&user_id)?;
        let elapsed = (now - live.started_at).num_seconds().max(0);
        if elapsed == 0 {
            return None;
        }
        let slice = SplitSlice {
            username: live.username.clone(),
            start_time: live.started_at,
            elapsed,
        };
        live.started_at = now;
        table.offsets.entry(user_id).or_default().stored += elapsed;
        Some(slice)
    }

    /// Startup recovery: open a live session at `now` with an optional
    /// already-stored bridge offset. Returns false if the user is already
    /// tracked.
    pub async fn recover(
        &self,
        user_id: UserId,
        username: &str,
        now: DateTime<Utc>,
        stored_seconds: i64,
    ) -> bool {
        let mut guard = self.table.lock().await;
        let table = &mut *guard;
        if table.live.contains_key(&user_id) || table.breaks.contains_key(&user_id) {
            return false;
        }
        table.live.insert(
            user_id,
            LiveEntry { username: username.to_string(), started_at: now },
        );
        if stored_seconds > 0 {
            table.offsets.insert(user_id, Offset { unbilled: 0, stored: stored_seconds });
        }
        true
    }

    pub async fn is_live(&self, user_id: UserId) -> bool {
        self.table.lock().await.live.contains_key(&user_id)
    }

    pub async fn is_on_break(&self, user_id: UserId) -> bool {
        self.table.lock().await.breaks.contains_key(&user_id)
    }

    pub async fn live_users(&self) -> Vec<UserId> {
        self.table.lock().await.live.keys().copied().collect()
    }

    pub async fn live_snapshot(&self) -> Vec<LiveSnapshot> {
        let table = self.table.lock().await;
        table
            .live
            .iter()
            .map(|(user_id, live)| LiveSnapshot {
                user_id: *user_id,
                username: live.username.clone(),
                started_at: live.started_at,
                offset: table.offsets.get(user_id).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// What the user's clock currently shows, or None if not tracked.
    pub async fn elapsed_display(&self, user_id: UserId, now: DateTime<Utc>) -> Option<i64> {
        let table = self.table.lock().await;
        let offset = table.offsets.get(&user_id).copied().unwrap_or_default();
        if let Some(live) = table.live.get(&user_id) {
            Some((now - live.started_at).num_seconds().max(0) + offset.display())
        } else if table.breaks.contains_key(&user_id) {
            Some(offset.display())
        } else {
            None
        }
    }

    pub async fn offset(&self, user_id: UserId) -> Offset {
        self.table.lock().await.offsets.get(&user_id).copied().unwrap_or_default()
    }

    /// Flush every open session for the shutdown saver. Entries with
    /// nothing billable are dropped silently.
    pub async fn drain_for_shutdown(&self, now: DateTime<Utc>) -> Vec<StopInfo> {
        let mut guard = self.table.lock().await;
        let mut users: Vec<UserId> = guard
            .live
            .keys()
            .chain(guard.breaks.keys())
            .copied()
            .collect();
        users.sort_unstable();
        users.dedup();

        users
            .into_iter()
            .filter_map(|user_id| close_user(&mut guard, user_id, now))
            .filter(|stop| stop.had_live || stop.session_seconds > 0)
            .collect()
    }
}

fn close_user(table: &mut SessionTable, user_id: UserId, now: DateTime<Utc>) -> Option<StopInfo> {
    let brk = table.breaks.remove(&user_id);
    let live = table.live.remove(&user_id);
    let offset = table.offsets.remove(&user_id).unwrap_or_default();
    let mut break_seconds = table.break_accum.remove(&user_id).unwrap_or(0);

    if let Some(brk) = &brk {
        break_seconds += (now - brk.started_at).num_seconds().max(0);
    }

    match live {
        Some(live) => {
            let session_seconds = (now - live.started_at).num_seconds().max(0) + offset.unbilled;
            Some(StopInfo {
                user_id,
                username: live.username,
                start_time: live.started_at,
                session_seconds,
                display_seconds: session_seconds + offset.stored,
                break_seconds,
                pause_panel: None,
                had_live: true,
            })
        }
        None => {
            let brk = brk?;
            // The true start was folded into the offset at pause time and
            // is unrecoverable; the billed duration is exact, the
            // timestamps are synthetic.
            let session_seconds = offset.unbilled;
            Some(StopInfo {
                user_id,
                username: brk.username,
                start_time: now,
                session_seconds,
                display_seconds: session_seconds + offset.stored,
                break_seconds,
                pause_panel: brk.pause_panel,
                had_live: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn begin_is_idempotent() {
        let manager = SessionManager::new();
        assert!(manager.begin(1, "mika", at(0)).await);
        assert!(!manager.begin(1, "mika", at(1)).await);
        assert_eq!(manager.elapsed_display(1, at(5)).await, Some(300));
    }

    #[tokio::test]
    async fn user_is_never_both_live_and_on_break() {
        let manager = SessionManager::new();
        manager.begin(1, "mika", at(0)).await;
        assert!(manager.is_live(1).await);
        assert!(!manager.is_on_break(1).await);

        manager.pause(1, at(10)).await;
        assert!(!manager.is_live(1).await);
        assert!(manager.is_on_break(1).await);

        manager.resume(1, at(15)).await;
        assert!(manager.is_live(1).await);
        assert!(!manager.is_on_break(1).await);
    }

    #[tokio::test]
    async fn offset_is_conserved_across_pause_resume() {
        let manager = SessionManager::new();
        manager.begin(1, "mika", at(0)).await;
        let before_pause = manager.elapsed_display(1, at(10)).await.unwrap();
        manager.pause(1, at(10)).await;
        manager.resume(1, at(15)).await;
        // Immediately after resume the clock shows exactly what it showed
        // at the pause: no time gained or lost.
        assert_eq!(manager.elapsed_display(1, at(15)).await.unwrap(), before_pause);
    }

    #[tokio::test]
    async fn pause_resume_stop_bills_work_time_only() {
        let manager = SessionManager::new();
        manager.begin(1, "mika", at(0)).await;
        manager.pause(1, at(10)).await;
        manager.resume(1, at(15)).await;
        let stop = manager.stop(1, at(40)).await.unwrap();

        // 10 minutes before the break plus 25 after; 5 minutes break excluded.
        assert_eq!(stop.session_seconds, 35 * 60);
        assert_eq!(stop.break_seconds, 5 * 60);
        assert!(stop.had_live);

        assert!(!manager.is_live(1).await);
        assert!(!manager.is_on_break(1).await);
        assert_eq!(manager.offset(1).await, Offset::default());
    }

    #[tokio::test]
    async fn split_reanchors_without_changing_the_display() {
        let manager = SessionManager::new();
        manager.begin(1, "mika", at(0)).await;
        let before = manager.elapsed_display(1, at(90)).await.unwrap();

        let slice = manager.split(1, at(90)).await.unwrap();
        assert_eq!(slice.elapsed, 90 * 60);
        assert_eq!(slice.start_time, at(0));

        let after = manager.elapsed_display(1, at(90)).await.unwrap();
        assert_eq!(before, after);

        // The split slice is already stored; a later stop bills only the
        // remainder.
        let stop = manager.stop(1, at(100)).await.unwrap();
        assert_eq!(stop.session_seconds, 10 * 60);
        assert_eq!(stop.display_seconds, 100 * 60);
    }

    #[tokio::test]
    async fn split_skips_users_with_nothing_elapsed() {
        let manager = SessionManager::new();
        manager.begin(1, "mika", at(0)).await;
        assert!(manager.split(1, at(0)).await.is_none());
        assert!(manager.split(2, at(5)).await.is_none());
    }

    #[tokio::test]
    async fn leaving_from_a_break_bills_the_carry_with_synthetic_start() {
        let manager = SessionManager::new();
        manager.begin(1, "mika", at(0)).await;
        manager.pause(1, at(20)).await;
        let stop = manager.stop(1, at(30)).await.unwrap();

        assert_eq!(stop.session_seconds, 20 * 60);
        assert_eq!(stop.break_seconds, 10 * 60);
        assert!(!stop.had_live);
        assert_eq!(stop.start_time, at(30));
    }

    #[tokio::test]
    async fn recover_bridges_stored_time_into_the_display() {
        let manager = SessionManager::new();
        assert!(manager.recover(1, "mika", at(0), 1200).await);
        assert!(!manager.recover(1, "mika", at(1), 0).await);

        assert_eq!(manager.elapsed_display(1, at(5)).await, Some(300 + 1200));
        // The bridged time is already stored, so a stop bills only the
        // freshly-elapsed slice.
        let stop = manager.stop(1, at(5)).await.unwrap();
        assert_eq!(stop.session_seconds, 300);
        assert_eq!(stop.display_seconds, 1500);
    }

    #[tokio::test]
    async fn drain_flushes_live_and_carried_sessions() {
        let manager = SessionManager::new();
        manager.begin(1, "mika", at(0)).await;
        manager.begin(2, "rin", at(5)).await;
        manager.pause(2, at(15)).await;
        // User 3 is on break with nothing billable yet.
        manager.begin(3, "sol", at(20)).await;
        manager.pause(3, at(20)).await;

        let mut flushed = manager.drain_for_shutdown(at(30)).await;
        flushed.sort_by_key(|stop| stop.user_id);

        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].user_id, 1);
        assert_eq!(flushed[0].session_seconds, 30 * 60);
        assert_eq!(flushed[1].user_id, 2);
        assert_eq!(flushed[1].session_seconds, 10 * 60);

        assert!(manager.live_users().await.is_empty());
        assert!(!manager.is_on_break(3).await);
    }
}
