use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Timelike, Utc};

/// Calendar day of `now` in the community's timezone.
pub fn local_date(now: DateTime<Utc>, tz: FixedOffset) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// UTC instant at which the local calendar day containing `now` began.
pub fn local_day_start(now: DateTime<Utc>, tz: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let since_midnight = i64::from(local.num_seconds_from_midnight());
    now - Duration::seconds(since_midnight) - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos()))
}

/// UTC instant of local Monday 00:00 for the week containing `now`.
pub fn local_week_start(now: DateTime<Utc>, tz: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let days_from_monday = i64::from(local.weekday().num_days_from_monday());
    local_day_start(now, tz) - Duration::days(days_from_monday)
}
