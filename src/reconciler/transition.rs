use crate::platform::VoicePresence;

/// What a presence change means for the work clock. Computed once from
/// the (before, after) pair as a whole, so an event that changes channel
/// and mute state together still maps to exactly one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Join,
    Resume,
    Pause,
    Stop,
}

pub fn classify(before: &VoicePresence, after: &VoicePresence) -> Option<TransitionKind> {
    let was_active = before.is_active();
    let was_on_break = before.is_on_break();

    if !was_active && !was_on_break && after.is_active() {
        Some(TransitionKind::Join)
    } else if was_on_break && after.is_active() {
        Some(TransitionKind::Resume)
    } else if was_active && after.is_on_break() {
        Some(TransitionKind::Pause)
    } else if (was_active || was_on_break) && !after.is_active() && !after.is_on_break() {
        Some(TransitionKind::Stop)
    } else {
        None
    }
}
