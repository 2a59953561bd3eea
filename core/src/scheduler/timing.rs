use crate::settings::{Frequency, Weekday};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, TimeZone};

/// Next occurrence of `time` in `tz` strictly after `now`.
pub fn next_daily_run(now: i64, time: NaiveTime, tz: FixedOffset) -> i64 {
    let local = local_now(now, tz);
    let mut candidate = at_time(&local, time, tz);
    if candidate <= now {
        candidate += Duration::days(1).num_seconds();
    }
    candidate
}

/// Next `weekday` at `time` in `tz` strictly after `now`.
pub fn next_weekly_run(now: i64, weekday: Weekday, time: NaiveTime, tz: FixedOffset) -> i64 {
    let local = local_now(now, tz);
    let today = local.weekday().num_days_from_monday() as i64;
    let target = weekday.to_chrono().num_days_from_monday() as i64;
    let days_ahead = (target - today).rem_euclid(7);

    let mut candidate = at_time(&local, time, tz) + Duration::days(days_ahead).num_seconds();
    if candidate <= now {
        candidate += Duration::weeks(1).num_seconds();
    }
    candidate
}

fn local_now(now: i64, tz: FixedOffset) -> DateTime<FixedOffset> {
    DateTime::from_timestamp(now, 0)
        .unwrap_or_default()
        .with_timezone(&tz)
}

fn at_time(local: &DateTime<FixedOffset>, time: NaiveTime, tz: FixedOffset) -> i64 {
    let naive = local.date_naive().and_time(time);
    tz.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| naive.and_utc().timestamp() - i64::from(tz.local_minus_utc()))
}

/// How late a scheduled scan may run before it counts as overdue.
pub fn overdue_grace(interval: i64) -> i64 {
    (interval / 4).max(60)
}

/// Largest drift between the stored and the desired run time that is
/// tolerated without rescheduling.
pub fn realign_tolerance(interval: i64) -> i64 {
    (interval / 20).max(60)
}

pub fn catch_up_delay(frequency: Frequency, interval: i64) -> i64 {
    if frequency == Frequency::Testing {
        60
    } else {
        (interval / 6).clamp(60, 300)
    }
}
