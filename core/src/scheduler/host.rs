//! The host cron the scheduler registers events with.

use crate::clock::Clock;
use crate::error::Result;
use crate::http::HttpClient;
use crate::settings::{SettingsRepository, DAY_IN_SECONDS, TESTING_INTERVAL, WEEK_IN_SECONDS};
use crate::store::{keys, OptionStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const QUEUE_SCHEDULE: &str = "watchdog_five_minutes";
pub const QUEUE_INTERVAL: i64 = 5 * 60;

/// Seconds between runs of a named recurring schedule.
pub fn schedule_interval(schedule: &str) -> Option<i64> {
    match schedule {
        "hourly" => Some(3_600),
        "twicedaily" => Some(DAY_IN_SECONDS / 2),
        "daily" => Some(DAY_IN_SECONDS),
        "weekly" => Some(WEEK_IN_SECONDS),
        "watchdog_testing" => Some(TESTING_INTERVAL),
        QUEUE_SCHEDULE => Some(QUEUE_INTERVAL),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub hook: String,
    pub timestamp: i64,
    /// `None` for one-off events.
    pub schedule: Option<String>,
}

pub trait CronHost: Send + Sync {
    /// Pending events for `hook`, earliest first.
    fn events(&self, hook: &str) -> Result<Vec<ScheduledEvent>>;

    fn scheduled(&self, hook: &str) -> Result<Option<ScheduledEvent>> {
        Ok(self.events(hook)?.into_iter().next())
    }

    fn schedule_recurring(&self, timestamp: i64, schedule: &str, hook: &str) -> Result<()>;
    fn schedule_single(&self, timestamp: i64, hook: &str) -> Result<()>;

    /// Removes the event for `hook` at exactly `timestamp`.
    fn unschedule(&self, timestamp: i64, hook: &str) -> Result<()>;

    /// Removes every event for `hook`, returning how many were dropped.
    fn clear(&self, hook: &str) -> Result<usize>;

    /// Asks the host to run due events as soon as possible. `false` when
    /// the host cannot do so.
    fn spawn_cron(&self) -> bool;

    /// Fallback trigger: hit the public cron endpoint without waiting.
    fn ping_cron_endpoint(&self) -> bool;

    fn cron_disabled(&self) -> bool;

    /// Events due at `now`, for hosts that expect the caller to run them.
    /// Hosts that fire events on their own return nothing.
    fn take_due(&self, _now: i64) -> Result<Vec<ScheduledEvent>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CronTable {
    #[serde(default)]
    events: Vec<ScheduledEvent>,
    #[serde(default)]
    spawn_requested: bool,
}

/// Cron host persisted in the option store. Events fire when
/// [`CronHost::take_due`] is called, which the CLI does from `tick` and
/// from the server loop.
#[derive(Clone)]
pub struct StoredCronHost {
    store: OptionStore,
    clock: Arc<dyn Clock>,
    http: HttpClient,
    disabled: bool,
    ping_url: Option<String>,
    pings: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl StoredCronHost {
    pub fn new(store: OptionStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            http: HttpClient::new().with_retries(0),
            disabled: false,
            ping_url: None,
            pings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Marks automatic cron as turned off; scans then rely on the REST
    /// endpoint being called by a system cron.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_ping_url(mut self, url: Option<String>) -> Self {
        self.ping_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    fn load(&self) -> Result<CronTable> {
        self.store.get_or_default(keys::CRON_EVENTS)
    }

    fn save(&self, table: &CronTable) -> Result<()> {
        self.store.set(keys::CRON_EVENTS, table)
    }

    pub fn all_events(&self) -> Result<Vec<ScheduledEvent>> {
        let mut events = self.load()?.events;
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    pub fn spawn_requested(&self) -> Result<bool> {
        Ok(self.load()?.spawn_requested)
    }

    /// Waits up to `timeout` for pings still in flight and returns how many
    /// finished. Short-lived processes call this before exiting so the
    /// runtime does not drop the request half way.
    pub async fn wait_for_pings(&self, timeout: Duration) -> usize {
        let handles = match self.pings.lock() {
            Ok(mut pings) => std::mem::take(&mut *pings),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if handles.is_empty() {
            return 0;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut finished = 0;
        for handle in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(_) => finished += 1,
                Err(_) => {
                    tracing::warn!("Gave up waiting for the cron endpoint ping");
                    break;
                }
            }
        }
        finished
    }

    fn track_ping(&self, handle: JoinHandle<()>) {
        let mut pings = match self.pings.lock() {
            Ok(pings) => pings,
            Err(poisoned) => poisoned.into_inner(),
        };
        pings.retain(|h| !h.is_finished());
        pings.push(handle);
    }
}

/// Appends the cron key to the endpoint URL.
fn keyed_url(url: &str, secret: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}key={}", urlencoding::encode(secret))
}

impl CronHost for StoredCronHost {
    fn events(&self, hook: &str) -> Result<Vec<ScheduledEvent>> {
        Ok(self
            .all_events()?
            .into_iter()
            .filter(|e| e.hook == hook)
            .collect())
    }

    fn schedule_recurring(&self, timestamp: i64, schedule: &str, hook: &str) -> Result<()> {
        let mut table = self.load()?;
        table.events.push(ScheduledEvent {
            hook: hook.to_string(),
            timestamp,
            schedule: Some(schedule.to_string()),
        });
        self.save(&table)
    }

    fn schedule_single(&self, timestamp: i64, hook: &str) -> Result<()> {
        let mut table = self.load()?;
        table.events.push(ScheduledEvent {
            hook: hook.to_string(),
            timestamp,
            schedule: None,
        });
        self.save(&table)
    }

    fn unschedule(&self, timestamp: i64, hook: &str) -> Result<()> {
        let mut table = self.load()?;
        table
            .events
            .retain(|e| !(e.hook == hook && e.timestamp == timestamp));
        self.save(&table)
    }

    fn clear(&self, hook: &str) -> Result<usize> {
        let mut table = self.load()?;
        let before = table.events.len();
        table.events.retain(|e| e.hook != hook);
        let removed = before - table.events.len();

        if removed > 0 {
            self.save(&table)?;
        }
        Ok(removed)
    }

    fn spawn_cron(&self) -> bool {
        if self.disabled {
            return false;
        }

        let result = self.load().and_then(|mut table| {
            table.spawn_requested = true;
            self.save(&table)
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Could not request a cron run");
                false
            }
        }
    }

    fn ping_cron_endpoint(&self) -> bool {
        let Some(url) = self.ping_url.clone() else {
            return false;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };

        // the endpoint rejects requests without the key, so read it fresh
        let secret = match SettingsRepository::new(self.store.clone(), self.clock.clone()).load() {
            Ok(settings) => settings.cron_secret,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read the cron key");
                return false;
            }
        };

        let http = self.http.clone();
        tracing::debug!(url = %url, at = self.clock.now(), "Pinging cron endpoint");
        let target = keyed_url(&url, &secret);
        let task = handle.spawn(async move {
            // the error's Display carries the keyed URL, keep it out of the log
            if let Err(e) = http.ping(&target).await {
                tracing::warn!(url = %url, status = ?e.status(), "Cron endpoint ping failed");
            }
        });
        self.track_ping(task);
        true
    }

    fn cron_disabled(&self) -> bool {
        self.disabled
    }

    /// Pops the events due at `now`. Recurring events move to their next
    /// slot strictly after `now`; one-off events are removed.
    fn take_due(&self, now: i64) -> Result<Vec<ScheduledEvent>> {
        let mut table = self.load()?;
        let mut due = Vec::new();
        let mut pending = Vec::with_capacity(table.events.len());

        for event in table.events {
            if event.timestamp > now {
                pending.push(event);
                continue;
            }

            due.push(event.clone());

            let Some(schedule) = event.schedule.clone() else {
                continue;
            };
            match schedule_interval(&schedule) {
                Some(interval) => {
                    let missed = (now - event.timestamp) / interval + 1;
                    pending.push(ScheduledEvent {
                        timestamp: event.timestamp + missed * interval,
                        ..event
                    });
                }
                None => {
                    tracing::warn!(hook = %event.hook, schedule = %schedule, "Dropping event with unknown schedule");
                }
            }
        }

        table.events = pending;
        table.spawn_requested = false;
        self.save(&table)?;

        due.sort_by_key(|e| e.timestamp);
        Ok(due)
    }
}
