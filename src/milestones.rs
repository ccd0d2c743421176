//! Cumulative-hour badge thresholds and the crossing/granting logic that
//! runs after new time lands in the store.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::platform::{BadgeOutcome, Notification, Notifier, UserId};

pub fn default_milestones() -> BTreeMap<u32, String> {
    BTreeMap::from([
        (10, "Bronze — 10 hours".to_string()),
        (50, "Silver — 50 hours".to_string()),
        (100, "Gold — 100 hours".to_string()),
        (500, "Trophy — 500 hours".to_string()),
        (1000, "Legend".to_string()),
    ])
}

/// Thresholds crossed when a user's all-time total moves from
/// `prev_seconds` to `new_seconds`, in ascending order. A batched
/// correction can cross several at once.
pub fn crossed_milestones<'a>(
    milestones: &'a BTreeMap<u32, String>,
    prev_seconds: i64,
    new_seconds: i64,
) -> Vec<(u32, &'a str)> {
    let prev_hours = (prev_seconds.max(0) / 3600) as u32;
    let new_hours = (new_seconds.max(0) / 3600) as u32;
    if new_hours <= prev_hours {
        return Vec::new();
    }

    milestones
        .iter()
        .filter(|(hours, _)| prev_hours < **hours && **hours <= new_hours)
        .map(|(hours, badge)| (*hours, badge.as_str()))
        .collect()
}

/// Grant every newly-crossed badge and announce it. Granting is idempotent
/// on the platform side; a conflict (badge already held, target role
/// missing) is a logged warning and never blocks the caller.
pub async fn evaluate_and_grant(
    notifier: &dyn Notifier,
    milestones: &BTreeMap<u32, String>,
    user_id: UserId,
    username: &str,
    prev_seconds: i64,
    new_seconds: i64,
) {
    for (hours, badge) in crossed_milestones(milestones, prev_seconds, new_seconds) {
        match notifier.grant_badge(user_id, hours, badge).await {
            Ok(BadgeOutcome::Granted) => {
                let notification = Notification::Milestone {
                    user_id,
                    username: username.to_string(),
                    hours,
                    badge: badge.to_string(),
                };
                if let Err(err) = notifier.post(notification).await {
                    warn!("milestone announcement failed for {username} at {hours}h: {err:#}");
                }
            }
            Ok(BadgeOutcome::AlreadyHeld) => {
                debug!("{username} already holds the {hours}h badge");
            }
            Err(err) => {
                warn!("badge grant failed for {username} at {hours}h: {err:#}");
            }
        }
    }
}
