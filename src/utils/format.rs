/// Rendering style for a second count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationStyle {
    /// "2h 5m 33s" — precise form used in panels.
    Full,
    /// "2h 5m", or just "5m" under an hour — short form for speech and rankings.
    Compact,
}

pub fn format_duration(total_seconds: i64, style: DurationStyle) -> String {
    let total_seconds = total_seconds.max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    match style {
        DurationStyle::Full => format!("{hours}h {minutes}m {seconds}s"),
        DurationStyle::Compact => {
            if hours > 0 {
                format!("{hours}h {minutes}m")
            } else {
                format!("{minutes}m")
            }
        }
    }
}
