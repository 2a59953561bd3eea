//! Ties scanning, persistence, notification and scheduling together.

use crate::cache::TransientCache;
use crate::clock::Clock;
use crate::error::{Result, WatchdogError};
use crate::history::HistoryRepository;
use crate::notifier::{Notifier, NotifyOutcome, SiteInfo};
use crate::queue::{JobSender, NotificationQueue, ProcessStats};
use crate::report::ScanReport;
use crate::risks::{risk_hash, RiskRepository};
use crate::scanner::Scanner;
use crate::scheduler::{
    CronHealth, CronHost, CronScheduler, CronStatusRepository, Evaluation, QUEUE_HOOK, SCAN_HOOK,
};
use crate::settings::{Frequency, SaveOutcome, Settings, SettingsRepository};
use crate::source::SourceRegistry;
use crate::store::OptionStore;
use crate::types::Risk;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Minimum gap between two manually triggered notifications.
pub const MANUAL_THROTTLE: i64 = 60;

const SETTINGS_NOTICES_KEY: &str = "settings_errors";
const SETTINGS_NOTICES_TTL: Duration = Duration::from_secs(30);

/// Who asked for a scan. Only manual runs are throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanContext {
    Scheduled,
    Manual,
    /// The REST cron endpoint; `force` bypasses content de-duplication.
    Remote { force: bool },
}

impl ScanContext {
    fn force(&self) -> bool {
        matches!(self, ScanContext::Remote { force: true })
    }

    fn respects_throttle(&self) -> bool {
        matches!(self, ScanContext::Manual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum NotificationDecision {
    Sent(NotifyOutcome),
    /// Same risk set as last time.
    Duplicate,
    NoRisks,
    Throttled { retry_in: i64 },
}

impl NotificationDecision {
    pub fn was_sent(&self) -> bool {
        matches!(self, NotificationDecision::Sent(outcome) if outcome.queued > 0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub processed: usize,
    pub succeeded: usize,
}

impl QueueSummary {
    fn add(&mut self, stats: ProcessStats) {
        self.processed += stats.processed;
        self.succeeded += stats.succeeded;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronResponse {
    pub status: String,
    pub message: String,
    pub queue: QueueSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "hook_kind")]
pub enum EventOutcome {
    Scan { report: ScanReport },
    Queue { stats: ProcessStats },
    Failed { hook: String, error: String },
    Ignored { hook: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminNotice {
    pub level: NoticeLevel,
    pub message: String,
}

impl AdminNotice {
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

pub struct Watchdog {
    clock: Arc<dyn Clock>,
    sources: SourceRegistry,
    settings: SettingsRepository,
    risks: RiskRepository,
    history: HistoryRepository,
    notifier: Notifier,
    scheduler: CronScheduler,
    transients: TransientCache,
}

impl Watchdog {
    pub fn new(
        store: OptionStore,
        clock: Arc<dyn Clock>,
        sources: SourceRegistry,
        host: Arc<dyn CronHost>,
        sender: Arc<dyn JobSender>,
        site: SiteInfo,
    ) -> Self {
        let settings = SettingsRepository::new(store.clone(), clock.clone());
        let queue = NotificationQueue::new(store.clone(), clock.clone());
        let scheduler = CronScheduler::new(
            host,
            settings.clone(),
            CronStatusRepository::new(store.clone()),
            clock.clone(),
        );

        Self {
            sources,
            risks: RiskRepository::new(store.clone()),
            history: HistoryRepository::new(store.clone()),
            notifier: Notifier::new(queue, sender, site, clock.clone()),
            scheduler,
            transients: TransientCache::new(store, clock.clone()),
            settings,
            clock,
        }
    }

    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.scheduler = self.scheduler.with_timezone(timezone);
        self
    }

    pub fn settings(&self) -> &SettingsRepository {
        &self.settings
    }

    pub fn risks(&self) -> &RiskRepository {
        &self.risks
    }

    pub fn history(&self) -> &HistoryRepository {
        &self.history
    }

    pub fn queue(&self) -> &NotificationQueue {
        self.notifier.queue()
    }

    pub fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    /// Scans, stores the risk list and a history snapshot, and notifies if
    /// asked to and the gate allows it.
    pub async fn run_scan(&self, notify: bool, context: ScanContext) -> Result<ScanReport> {
        let run_at = self.clock.now();
        let settings = self.settings.load()?;
        let ignored = self.risks.ignored()?;

        let mut report = Scanner::new(&self.sources).scan(run_at, &ignored).await?;

        self.risks.save_current(&report.risks)?;
        self.history
            .save(run_at, &report.risks, settings.history_retention)?;

        tracing::info!(
            run_at,
            risks = report.risks.len(),
            warnings = report.warnings.len(),
            ?context,
            "Scan finished"
        );

        if notify {
            let decision = self
                .dispatch(&report.risks, &settings, context.force(), context.respects_throttle())
                .await?;
            report.notified = decision.was_sent();
        }

        Ok(report)
    }

    /// Notifies about the stored risk list without scanning.
    pub async fn send_notifications(&self, force: bool, respect_throttle: bool) -> Result<NotificationDecision> {
        let settings = self.settings.load()?;
        let risks = self.risks.current()?;
        self.dispatch(&risks, &settings, force, respect_throttle).await
    }

    async fn dispatch(
        &self,
        risks: &[Risk],
        settings: &Settings,
        force: bool,
        respect_throttle: bool,
    ) -> Result<NotificationDecision> {
        let now = self.clock.now();

        if respect_throttle {
            if let Some(last) = settings.last_manual_notification_at {
                let elapsed = now - last;
                if elapsed < MANUAL_THROTTLE {
                    tracing::info!(retry_in = MANUAL_THROTTLE - elapsed, "Manual notification throttled");
                    return Ok(NotificationDecision::Throttled {
                        retry_in: MANUAL_THROTTLE - elapsed,
                    });
                }
            }
        }

        let hash = risk_hash(risks);
        let changed = self.risks.last_notification_hash()?.as_deref() != Some(hash.as_str());
        let testing = settings.frequency == Frequency::Testing;

        if !(force || testing || (!risks.is_empty() && changed)) {
            if changed {
                self.risks.set_last_notification_hash(&hash)?;
            }
            let decision = if risks.is_empty() {
                NotificationDecision::NoRisks
            } else {
                NotificationDecision::Duplicate
            };
            tracing::debug!(?decision, "Notification skipped");
            return Ok(decision);
        }

        let outcome = self.notifier.notify(risks, &settings.notifications).await?;
        self.risks.set_last_notification_hash(&hash)?;
        if respect_throttle {
            self.settings
                .update(|s| s.last_manual_notification_at = Some(now))?;
        }

        tracing::info!(
            queued = outcome.queued,
            delivered = outcome.stats.succeeded,
            "Notification dispatched"
        );
        Ok(NotificationDecision::Sent(outcome))
    }

    pub async fn flush_notification_queue(&self) -> Result<ProcessStats> {
        self.notifier.flush().await
    }

    /// Validates and stores settings, then brings the schedule in line.
    pub fn save_settings(&self, settings: Settings) -> Result<SaveOutcome> {
        let outcome = self.settings.save(settings)?;
        if !outcome.notices.is_empty() {
            self.transients
                .set_with_ttl(SETTINGS_NOTICES_KEY, &outcome.notices, SETTINGS_NOTICES_TTL)?;
        }
        self.scheduler.evaluate()?;
        Ok(outcome)
    }

    pub fn evaluate_schedule(&self) -> Result<Evaluation> {
        self.scheduler.evaluate()
    }

    /// Runs every host event that is due. Each hook runs at most once per
    /// call even if a catch-up event is due alongside the recurring one.
    pub async fn run_due_events(&self) -> Result<Vec<EventOutcome>> {
        let now = self.clock.now();
        let due = self.scheduler.host().take_due(now)?;

        let mut seen: Vec<String> = Vec::new();
        let mut outcomes = Vec::new();

        for event in due {
            if seen.contains(&event.hook) {
                continue;
            }
            seen.push(event.hook.clone());

            let outcome = match event.hook.as_str() {
                SCAN_HOOK => match self.run_scan(true, ScanContext::Scheduled).await {
                    Ok(report) => EventOutcome::Scan { report },
                    Err(e) => {
                        tracing::error!(hook = %event.hook, error = %e, "Scheduled scan failed");
                        EventOutcome::Failed {
                            hook: event.hook,
                            error: e.to_string(),
                        }
                    }
                },
                QUEUE_HOOK => match self.flush_notification_queue().await {
                    Ok(stats) => EventOutcome::Queue { stats },
                    Err(e) => {
                        tracing::error!(hook = %event.hook, error = %e, "Queue worker failed");
                        EventOutcome::Failed {
                            hook: event.hook,
                            error: e.to_string(),
                        }
                    }
                },
                _ => {
                    tracing::debug!(hook = %event.hook, "No handler for cron hook");
                    EventOutcome::Ignored { hook: event.hook }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// REST cron entry point. The key is compared in constant time against
    /// the stored secret.
    pub async fn handle_cron_request(
        &self,
        key: Option<&str>,
        force: bool,
        notify_only: bool,
    ) -> Result<CronResponse> {
        let settings = self.settings.load()?;
        let key = key.unwrap_or_default();
        if key.is_empty()
            || settings.cron_secret.is_empty()
            || !constant_time_eq::constant_time_eq(key.as_bytes(), settings.cron_secret.as_bytes())
        {
            tracing::warn!("Rejected cron request with invalid key");
            return Err(WatchdogError::Forbidden);
        }

        let mut queue = QueueSummary::default();

        let message = if notify_only {
            let decision = self.send_notifications(force, false).await?;
            if let NotificationDecision::Sent(outcome) = decision {
                queue.add(outcome.stats);
            }
            match decision {
                d if d.was_sent() => "Notifications sent.".to_string(),
                NotificationDecision::Duplicate => "No new risks to notify.".to_string(),
                _ => "Nothing to notify.".to_string(),
            }
        } else {
            let report = self.run_scan(false, ScanContext::Remote { force }).await?;
            let decision = self
                .dispatch(&report.risks, &settings, force, false)
                .await?;
            if let NotificationDecision::Sent(outcome) = decision {
                queue.add(outcome.stats);
            }
            format!(
                "Scan complete: {} plugin(s) at risk, notification {}.",
                report.risks.len(),
                if decision.was_sent() { "sent" } else { "not sent" }
            )
        };

        queue.add(self.flush_notification_queue().await?);

        Ok(CronResponse {
            status: "ok".to_string(),
            message,
            queue,
        })
    }

    pub fn requeue_dead_letter(&self) -> Result<bool> {
        self.queue().requeue_last_failed()
    }

    /// Pretty JSON of the dead-letter record for download, if there is one.
    pub fn export_dead_letter(&self) -> Result<Option<String>> {
        match self.queue().last_failed()? {
            Some(record) => Ok(Some(serde_json::to_string_pretty(&record)?)),
            None => Ok(None),
        }
    }

    /// Notices for the admin screen. Settings corrections from the last
    /// save are shown once.
    pub fn admin_notices(&self) -> Result<Vec<AdminNotice>> {
        let mut notices = Vec::new();

        match self.scheduler.health()? {
            CronHealth::Disabled => notices.push(AdminNotice::new(
                NoticeLevel::Error,
                "Automatic cron is disabled. Scans only run when the cron endpoint is called by a system cron job.",
            )),
            CronHealth::Drifting { streak } => notices.push(AdminNotice::new(
                NoticeLevel::Warning,
                format!(
                    "Scheduled scans are running late ({} overdue checks in a row). Consider calling the cron endpoint from a system cron job.",
                    streak
                ),
            )),
            CronHealth::Healthy => {}
        }

        if let Some(corrections) = self.transients.get::<Vec<String>>(SETTINGS_NOTICES_KEY)? {
            self.transients.delete(SETTINGS_NOTICES_KEY)?;
            notices.extend(
                corrections
                    .into_iter()
                    .map(|message| AdminNotice::new(NoticeLevel::Warning, message)),
            );
        }

        if let Some(failed) = self.queue().last_failed()? {
            notices.push(AdminNotice::new(
                NoticeLevel::Warning,
                format!(
                    "{} notification failed after {} attempts: {}",
                    failed.description,
                    failed.attempts,
                    failed.last_error.as_deref().unwrap_or("unknown error")
                ),
            ));
        }

        let settings = self.settings.load()?;
        if let (Frequency::Testing, Some(expires)) = (settings.frequency, settings.testing_expires_at) {
            notices.push(AdminNotice::new(
                NoticeLevel::Info,
                format!(
                    "Testing frequency is active until {}.",
                    crate::notifier::format_timestamp(expires)
                ),
            ));
        }

        Ok(notices)
    }
}
