//! Keeps exactly one recurring scan registered with the host cron and
//! notices when the host stops running it.
//!
//! [`CronScheduler::evaluate`] is cheap and idempotent, so it is called on
//! every load and after every settings save. Each call:
//!
//! 1. reverts an expired testing frequency to daily,
//! 2. works out when the next scan should run,
//! 3. if the scheduled scan is overdue, bumps the overdue streak, pokes the
//!    host cron and queues a one-off catch-up run, and stops there,
//! 4. otherwise resets the streak and only reschedules when the registered
//!    schedule or run time has drifted from the settings.
//!
//! The queue worker is kept registered on its own five minute schedule, and
//! hooks used by earlier releases are always cleared.

pub mod host;
pub mod timing;

pub use host::{CronHost, ScheduledEvent, StoredCronHost, QUEUE_INTERVAL, QUEUE_SCHEDULE};

use crate::clock::Clock;
use crate::error::Result;
use crate::settings::{parse_time_of_day, Frequency, Settings, SettingsRepository};
use crate::store::{keys, OptionStore};
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SCAN_HOOK: &str = "watchdog_scan";
pub const QUEUE_HOOK: &str = "watchdog_process_queue";
pub const LEGACY_HOOKS: [&str; 2] = ["wp_watchdog_daily_scan", "wp_watchdog_queue_worker"];

pub const MAX_OVERDUE_STREAK: u32 = 10;
/// Consecutive overdue checks before drift is reported.
pub const DRIFT_WARNING_STREAK: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronStatus {
    pub cron_disabled: bool,
    pub overdue_streak: u32,
    pub last_checked: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum CronHealth {
    Healthy,
    Drifting { streak: u32 },
    Disabled,
}

impl CronStatus {
    pub fn health(&self) -> CronHealth {
        if self.cron_disabled {
            CronHealth::Disabled
        } else if self.overdue_streak >= DRIFT_WARNING_STREAK {
            CronHealth::Drifting {
                streak: self.overdue_streak,
            }
        } else {
            CronHealth::Healthy
        }
    }
}

#[derive(Debug, Clone)]
pub struct CronStatusRepository {
    store: OptionStore,
}

impl CronStatusRepository {
    pub fn new(store: OptionStore) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<CronStatus> {
        self.store.get_or_default(keys::CRON_STATUS)
    }

    pub fn save(&self, status: &CronStatus) -> Result<()> {
        self.store.set(keys::CRON_STATUS, status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ScheduleDecision {
    /// Manual frequency: no scan is scheduled.
    Cleared,
    Scheduled { timestamp: i64 },
    Rescheduled { from: i64, timestamp: i64 },
    Unchanged { timestamp: i64 },
    CatchUp {
        overdue_since: i64,
        triggered: bool,
        catch_up_at: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub frequency: Frequency,
    pub decision: ScheduleDecision,
    pub status: CronStatus,
    pub testing_reverted: bool,
}

pub struct CronScheduler {
    host: Arc<dyn CronHost>,
    settings: SettingsRepository,
    status: CronStatusRepository,
    clock: Arc<dyn Clock>,
    timezone: FixedOffset,
}

impl CronScheduler {
    pub fn new(
        host: Arc<dyn CronHost>,
        settings: SettingsRepository,
        status: CronStatusRepository,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            host,
            settings,
            status,
            clock,
            timezone: Utc.fix(),
        }
    }

    /// Timezone daily and weekly run times are expressed in.
    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn host(&self) -> &Arc<dyn CronHost> {
        &self.host
    }

    pub fn status(&self) -> Result<CronStatus> {
        self.status.load()
    }

    pub fn health(&self) -> Result<CronHealth> {
        Ok(self.status()?.health())
    }

    /// Desired next scan for the given settings, `None` for manual.
    pub fn next_run(&self, settings: &Settings, now: i64) -> Option<i64> {
        let fallback = NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default();
        match settings.frequency {
            Frequency::Daily => {
                let time = parse_time_of_day(&settings.daily_time).unwrap_or(fallback);
                Some(timing::next_daily_run(now, time, self.timezone))
            }
            Frequency::Weekly => {
                let time = parse_time_of_day(&settings.weekly_time).unwrap_or(fallback);
                Some(timing::next_weekly_run(now, settings.weekly_day, time, self.timezone))
            }
            Frequency::Testing => settings.frequency.interval().map(|i| now + i),
            Frequency::Manual => None,
        }
    }

    fn record(&self, overdue: bool, now: i64) -> Result<CronStatus> {
        let previous = self.status.load()?;
        let status = CronStatus {
            cron_disabled: self.host.cron_disabled(),
            overdue_streak: if overdue {
                (previous.overdue_streak + 1).min(MAX_OVERDUE_STREAK)
            } else {
                0
            },
            last_checked: now,
        };
        self.status.save(&status)?;
        Ok(status)
    }

    fn clear_legacy_hooks(&self) -> Result<()> {
        for hook in LEGACY_HOOKS {
            let removed = self.host.clear(hook)?;
            if removed > 0 {
                tracing::info!(hook, removed, "Cleared legacy cron hook");
            }
        }
        Ok(())
    }

    /// Registers the queue worker unless exactly one correctly named event
    /// exists. Returns whether anything changed.
    pub fn ensure_queue_worker(&self) -> Result<bool> {
        let events = self.host.events(QUEUE_HOOK)?;
        let healthy = events.len() == 1 && events[0].schedule.as_deref() == Some(QUEUE_SCHEDULE);
        if healthy {
            return Ok(false);
        }

        self.host.clear(QUEUE_HOOK)?;
        let at = self.clock.now() + QUEUE_INTERVAL;
        self.host.schedule_recurring(at, QUEUE_SCHEDULE, QUEUE_HOOK)?;
        tracing::debug!(at, "Registered queue worker");
        Ok(true)
    }

    pub fn evaluate(&self) -> Result<Evaluation> {
        self.clear_legacy_hooks()?;
        self.ensure_queue_worker()?;

        let now = self.clock.now();
        let mut settings = self.settings.load()?;
        let mut testing_reverted = false;

        if settings.testing_expired(now) {
            settings = self.settings.update(|s| {
                s.frequency = Frequency::Daily;
                s.testing_expires_at = None;
            })?;
            testing_reverted = true;
            tracing::info!("Testing frequency expired, reverted to daily");
        }

        let frequency = settings.frequency;
        let (Some(interval), Some(schedule), Some(desired)) = (
            frequency.interval(),
            frequency.schedule_name(),
            self.next_run(&settings, now),
        ) else {
            let removed = self.host.clear(SCAN_HOOK)?;
            if removed > 0 {
                tracing::info!("Manual frequency, scan schedule cleared");
            }
            let status = self.record(false, now)?;
            return Ok(Evaluation {
                frequency,
                decision: ScheduleDecision::Cleared,
                status,
                testing_reverted,
            });
        };

        let events = self.host.events(SCAN_HOOK)?;

        if let Some(earliest) = events.first() {
            let grace = timing::overdue_grace(interval);
            if earliest.timestamp <= now - (interval + grace) {
                let status = self.record(true, now)?;
                let triggered = self.host.spawn_cron() || self.host.ping_cron_endpoint();

                let catch_up_at = if events.iter().any(|e| e.timestamp > now) {
                    None
                } else {
                    let at = now + timing::catch_up_delay(frequency, interval);
                    self.host.schedule_single(at, SCAN_HOOK)?;
                    Some(at)
                };

                tracing::warn!(
                    scheduled = earliest.timestamp,
                    streak = status.overdue_streak,
                    triggered,
                    catch_up_at = ?catch_up_at,
                    "Scheduled scan is overdue"
                );
                return Ok(Evaluation {
                    frequency,
                    decision: ScheduleDecision::CatchUp {
                        overdue_since: earliest.timestamp,
                        triggered,
                        catch_up_at,
                    },
                    status,
                    testing_reverted,
                });
            }
        }

        let status = self.record(false, now)?;
        let recurring: Vec<&ScheduledEvent> = events.iter().filter(|e| e.schedule.is_some()).collect();

        let decision = match recurring.as_slice() {
            [] => {
                self.host.schedule_recurring(desired, schedule, SCAN_HOOK)?;
                tracing::info!(at = desired, schedule, "Scheduled scan");
                ScheduleDecision::Scheduled { timestamp: desired }
            }
            [event] if event.timestamp <= now => ScheduleDecision::Unchanged {
                timestamp: event.timestamp,
            },
            [event] if !self.needs_realignment(event, schedule, frequency, desired, interval) => {
                ScheduleDecision::Unchanged {
                    timestamp: event.timestamp,
                }
            }
            [event] => {
                self.host.unschedule(event.timestamp, SCAN_HOOK)?;
                self.host.schedule_recurring(desired, schedule, SCAN_HOOK)?;
                tracing::info!(from = event.timestamp, at = desired, schedule, "Realigned scan schedule");
                ScheduleDecision::Rescheduled {
                    from: event.timestamp,
                    timestamp: desired,
                }
            }
            [first, ..] => {
                let from = first.timestamp;
                for event in &recurring {
                    self.host.unschedule(event.timestamp, SCAN_HOOK)?;
                }
                self.host.schedule_recurring(desired, schedule, SCAN_HOOK)?;
                tracing::info!(at = desired, "Replaced duplicate scan schedules");
                ScheduleDecision::Rescheduled { from, timestamp: desired }
            }
        };

        Ok(Evaluation {
            frequency,
            decision,
            status,
            testing_reverted,
        })
    }

    fn needs_realignment(
        &self,
        event: &ScheduledEvent,
        schedule: &str,
        frequency: Frequency,
        desired: i64,
        interval: i64,
    ) -> bool {
        if event.schedule.as_deref() != Some(schedule) {
            return true;
        }

        // Testing runs are relative to now, so an earlier run is expected.
        let drift = if frequency == Frequency::Testing {
            (event.timestamp - desired).max(0)
        } else {
            (event.timestamp - desired).abs()
        };
        drift > timing::realign_tolerance(interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::settings::{DAY_IN_SECONDS, TESTING_DURATION, TESTING_INTERVAL};

    // 2024-01-03 10:00:00 UTC
    const NOW: i64 = 1_704_276_000;

    struct Fixture {
        scheduler: CronScheduler,
        host: Arc<StoredCronHost>,
        settings: SettingsRepository,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = OptionStore::in_memory();
        let clock = Arc::new(ManualClock::new(NOW));
        let host = Arc::new(StoredCronHost::new(store.clone(), clock.clone()));
        let settings = SettingsRepository::new(store.clone(), clock.clone());
        let scheduler = CronScheduler::new(
            host.clone(),
            settings.clone(),
            CronStatusRepository::new(store),
            clock.clone(),
        );
        Fixture {
            scheduler,
            host,
            settings,
            clock,
        }
    }

    fn set_frequency(settings: &SettingsRepository, frequency: Frequency) {
        let current = settings.load().unwrap();
        settings
            .save(Settings {
                frequency,
                ..current
            })
            .unwrap();
    }

    #[test]
    fn test_first_evaluation_schedules_daily() {
        let f = fixture();
        let evaluation = f.scheduler.evaluate().unwrap();

        // default daily time is 08:00, already past today
        let expected = NOW + DAY_IN_SECONDS - 7_200;
        assert_eq!(evaluation.decision, ScheduleDecision::Scheduled { timestamp: expected });

        let event = f.host.scheduled(SCAN_HOOK).unwrap().unwrap();
        assert_eq!(event.timestamp, expected);
        assert_eq!(event.schedule.as_deref(), Some("daily"));
        assert_eq!(f.host.events(QUEUE_HOOK).unwrap().len(), 1);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let f = fixture();
        f.scheduler.evaluate().unwrap();
        let before = f.host.all_events().unwrap();

        let second = f.scheduler.evaluate().unwrap();

        assert!(matches!(second.decision, ScheduleDecision::Unchanged { .. }));
        assert_eq!(f.host.all_events().unwrap(), before);
        assert_eq!(f.host.events(SCAN_HOOK).unwrap().len(), 1);
    }

    #[test]
    fn test_frequency_change_realigns() {
        let f = fixture();
        f.scheduler.evaluate().unwrap();

        set_frequency(&f.settings, Frequency::Weekly);
        let evaluation = f.scheduler.evaluate().unwrap();

        assert!(matches!(evaluation.decision, ScheduleDecision::Rescheduled { .. }));
        let events = f.host.events(SCAN_HOOK).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].schedule.as_deref(), Some("weekly"));
    }

    #[test]
    fn test_time_change_realigns() {
        let f = fixture();
        f.scheduler.evaluate().unwrap();

        let current = f.settings.load().unwrap();
        f.settings
            .save(Settings {
                daily_time: "20:00".to_string(),
                ..current
            })
            .unwrap();

        let evaluation = f.scheduler.evaluate().unwrap();
        assert_eq!(
            evaluation.decision,
            ScheduleDecision::Rescheduled {
                from: NOW + DAY_IN_SECONDS - 7_200,
                timestamp: NOW + 36_000,
            }
        );
    }

    #[test]
    fn test_due_event_is_left_alone() {
        let f = fixture();
        f.scheduler.evaluate().unwrap();
        let scheduled = f.host.scheduled(SCAN_HOOK).unwrap().unwrap().timestamp;

        // due, but within interval + grace
        f.clock.set(scheduled + 3_600);
        let evaluation = f.scheduler.evaluate().unwrap();

        assert_eq!(evaluation.decision, ScheduleDecision::Unchanged { timestamp: scheduled });
        assert_eq!(evaluation.status.overdue_streak, 0);
    }

    #[test]
    fn test_overdue_schedules_catch_up_once() {
        let f = fixture();
        f.scheduler.evaluate().unwrap();
        let scheduled = f.host.scheduled(SCAN_HOOK).unwrap().unwrap().timestamp;

        // interval 86400 plus grace 21600
        let late = scheduled + DAY_IN_SECONDS + 21_600;
        f.clock.set(late);
        let evaluation = f.scheduler.evaluate().unwrap();

        assert_eq!(
            evaluation.decision,
            ScheduleDecision::CatchUp {
                overdue_since: scheduled,
                triggered: true,
                catch_up_at: Some(late + 300),
            }
        );
        assert_eq!(evaluation.status.overdue_streak, 1);
        assert!(f.host.spawn_requested().unwrap());

        // recurring event untouched, catch-up not duplicated
        f.clock.advance(10);
        let again = f.scheduler.evaluate().unwrap();
        assert!(matches!(again.decision, ScheduleDecision::CatchUp { catch_up_at: None, .. }));
        assert_eq!(again.status.overdue_streak, 2);
        assert_eq!(f.scheduler.health().unwrap(), CronHealth::Drifting { streak: 2 });

        let events = f.host.events(SCAN_HOOK).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, scheduled);
    }

    #[test]
    fn test_streak_is_capped_and_resets() {
        let f = fixture();
        f.scheduler.evaluate().unwrap();
        let scheduled = f.host.scheduled(SCAN_HOOK).unwrap().unwrap().timestamp;
        f.clock.set(scheduled + 2 * DAY_IN_SECONDS);

        for _ in 0..12 {
            f.scheduler.evaluate().unwrap();
        }
        assert_eq!(f.scheduler.status().unwrap().overdue_streak, MAX_OVERDUE_STREAK);

        let now = f.clock.now();
        f.host.take_due(now).unwrap();
        let evaluation = f.scheduler.evaluate().unwrap();
        assert_eq!(evaluation.status.overdue_streak, 0);
        assert_eq!(f.scheduler.health().unwrap(), CronHealth::Healthy);
    }

    #[test]
    fn test_manual_clears_scan_but_keeps_queue_worker() {
        let f = fixture();
        f.scheduler.evaluate().unwrap();

        set_frequency(&f.settings, Frequency::Manual);
        let evaluation = f.scheduler.evaluate().unwrap();

        assert_eq!(evaluation.decision, ScheduleDecision::Cleared);
        assert!(f.host.scheduled(SCAN_HOOK).unwrap().is_none());
        assert_eq!(f.host.events(QUEUE_HOOK).unwrap().len(), 1);
    }

    #[test]
    fn test_testing_schedules_short_interval_and_expires() {
        let f = fixture();
        set_frequency(&f.settings, Frequency::Testing);

        let evaluation = f.scheduler.evaluate().unwrap();
        assert_eq!(
            evaluation.decision,
            ScheduleDecision::Scheduled {
                timestamp: NOW + TESTING_INTERVAL
            }
        );
        assert_eq!(
            f.host.scheduled(SCAN_HOOK).unwrap().unwrap().schedule.as_deref(),
            Some("watchdog_testing")
        );

        // a later evaluation does not push the run back
        f.clock.advance(300);
        let evaluation = f.scheduler.evaluate().unwrap();
        assert_eq!(
            evaluation.decision,
            ScheduleDecision::Unchanged {
                timestamp: NOW + TESTING_INTERVAL
            }
        );

        f.clock.set(NOW + TESTING_DURATION);
        let now = f.clock.now();
        f.host.take_due(now).unwrap();
        let evaluation = f.scheduler.evaluate().unwrap();

        assert!(evaluation.testing_reverted);
        assert_eq!(evaluation.frequency, Frequency::Daily);
        assert_eq!(f.settings.load().unwrap().frequency, Frequency::Daily);
        assert_eq!(
            f.host.scheduled(SCAN_HOOK).unwrap().unwrap().schedule.as_deref(),
            Some("daily")
        );
    }

    #[test]
    fn test_legacy_hooks_are_cleared() {
        let f = fixture();
        f.host.schedule_recurring(NOW, "daily", "wp_watchdog_daily_scan").unwrap();
        f.host.schedule_recurring(NOW, "hourly", "wp_watchdog_queue_worker").unwrap();

        f.scheduler.evaluate().unwrap();

        assert!(f.host.events("wp_watchdog_daily_scan").unwrap().is_empty());
        assert!(f.host.events("wp_watchdog_queue_worker").unwrap().is_empty());
    }

    #[test]
    fn test_misnamed_queue_worker_is_replaced() {
        let f = fixture();
        f.host.schedule_recurring(NOW, "hourly", QUEUE_HOOK).unwrap();

        assert!(f.scheduler.ensure_queue_worker().unwrap());
        assert!(!f.scheduler.ensure_queue_worker().unwrap());

        let events = f.host.events(QUEUE_HOOK).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].schedule.as_deref(), Some(QUEUE_SCHEDULE));
    }

    #[test]
    fn test_disabled_cron_is_reported() {
        let store = OptionStore::in_memory();
        let clock = Arc::new(ManualClock::new(NOW));
        let host = Arc::new(StoredCronHost::new(store.clone(), clock.clone()).with_disabled(true));
        let scheduler = CronScheduler::new(
            host,
            SettingsRepository::new(store.clone(), clock.clone()),
            CronStatusRepository::new(store),
            clock,
        );

        let evaluation = scheduler.evaluate().unwrap();
        assert!(evaluation.status.cron_disabled);
        assert_eq!(scheduler.health().unwrap(), CronHealth::Disabled);
    }
}
