//! Contracts for the platform collaborators the core is wired to: the
//! presence/gateway side, the notification renderer, and the voice
//! announcement backend. The core never talks to the chat platform
//! directly.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type ChannelId = u64;
/// Opaque handle to an externally rendered notification, usable later for
/// "delete this".
pub type MessageRef = u64;

/// A user's raw voice presence as the platform reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoicePresence {
    pub channel: Option<ChannelId>,
    pub self_muted: bool,
}

impl VoicePresence {
    pub fn active(channel: ChannelId) -> Self {
        Self { channel: Some(channel), self_muted: false }
    }

    pub fn muted(channel: ChannelId) -> Self {
        Self { channel: Some(channel), self_muted: true }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Connected and unmuted: the work clock runs.
    pub fn is_active(&self) -> bool {
        self.channel.is_some() && !self.self_muted
    }

    /// Connected but self-muted: on break, clock paused.
    pub fn is_on_break(&self) -> bool {
        self.channel.is_some() && self.self_muted
    }
}

#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub username: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone)]
pub struct PresentMember {
    pub member: MemberInfo,
    pub presence: VoicePresence,
}

/// Read-only view of current voice-channel membership, used by startup
/// recovery. Live changes arrive as `on_presence_change` calls instead.
#[async_trait]
pub trait PresenceSource: Send + Sync {
    async fn present_members(&self) -> Result<Vec<PresentMember>>;
}

/// A structured notification request. Duration strings are pre-formatted
/// by the core so the renderer stays dumb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Join { user_id: UserId, username: String, today_total: String },
    Pause { user_id: UserId, username: String, session_so_far: String },
    Resume { user_id: UserId, username: String },
    Stop { user_id: UserId, username: String, session: String, today_total: String },
    Milestone { user_id: UserId, username: String, hours: u32, badge: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeOutcome {
    Granted,
    /// The user already holds the badge; granting again is a no-op.
    AlreadyHeld,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, notification: Notification) -> Result<MessageRef>;
    async fn delete(&self, message: MessageRef) -> Result<()>;
    async fn grant_badge(&self, user_id: UserId, hours: u32, badge: &str) -> Result<BadgeOutcome>;
}

/// Best-effort spoken announcements. Consumed through the announcer queue;
/// the reconciler never waits on playback.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn speak(&self, channel: ChannelId, text: &str, user_id: UserId) -> Result<()>;
}
