//! Turns a risk set into delivery jobs, one per enabled channel, and pushes
//! them through the [`NotificationQueue`].

pub mod email;
pub mod transport;
pub mod webhook;

pub use transport::{DeliverySender, Mailer};

use crate::clock::Clock;
use crate::error::Result;
use crate::queue::{Channel, JobRequest, JobSender, NotificationQueue, ProcessStats};
use crate::settings::{ChatSettings, NotificationSettings};
use crate::types::Risk;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteInfo {
    pub name: String,
    pub url: String,
    /// Fallback recipient when no email recipients are configured.
    pub admin_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub url: String,
    pub body: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyOutcome {
    pub queued: usize,
    pub stats: ProcessStats,
}

pub fn summary_line(count: usize) -> String {
    if count == 1 {
        "1 plugin needs attention".to_string()
    } else {
        format!("{} plugins need attention", count)
    }
}

pub fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn webhook_payload(url: &str, body: &Value, secret: Option<&str>) -> WebhookPayload {
    let body = body.to_string();
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());

    if let Some(signature) = secret.and_then(|s| webhook::signature(&body, s)) {
        headers.insert(webhook::SIGNATURE_HEADER.to_string(), signature);
    }

    WebhookPayload {
        url: url.trim().to_string(),
        body,
        headers,
    }
}

type BodyRenderer = fn(&SiteInfo, &[Risk], i64) -> Value;

pub struct Notifier {
    queue: NotificationQueue,
    sender: Arc<dyn JobSender>,
    site: SiteInfo,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    pub fn new(
        queue: NotificationQueue,
        sender: Arc<dyn JobSender>,
        site: SiteInfo,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            sender,
            site,
            clock,
        }
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    pub fn site(&self) -> &SiteInfo {
        &self.site
    }

    /// One job per enabled channel. Targets are not checked here; a missing
    /// recipient or URL fails at send time and goes through the retry path.
    pub fn build_jobs(&self, risks: &[Risk], settings: &NotificationSettings) -> Vec<JobRequest> {
        let now = self.clock.now();
        let mut jobs = Vec::new();

        if settings.email.enabled {
            let mut to = settings.email.recipients.clone();
            if to.is_empty() {
                to.extend(self.site.admin_email.iter().cloned());
            }
            let payload = EmailPayload {
                to,
                subject: email::subject(&self.site, risks),
                html: email::render(&self.site, risks, now),
            };
            jobs.push(JobRequest::from_payload(Channel::Email, "Email", &payload));
        }

        if settings.webhook.enabled {
            let body = webhook::generic_body(&self.site, risks, now);
            let payload = webhook_payload(
                &settings.webhook.url,
                &body,
                settings.webhook.secret.as_deref(),
            );
            jobs.push(JobRequest::from_payload(Channel::Webhook, "Webhook", &payload));
        }

        let chats: [(&str, &ChatSettings, BodyRenderer); 3] = [
            ("Discord", &settings.discord, webhook::discord_body),
            ("Slack", &settings.slack, webhook::slack_body),
            ("Microsoft Teams", &settings.teams, webhook::teams_body),
        ];
        for (service, chat, render) in chats {
            if !chat.enabled {
                continue;
            }
            let body = render(&self.site, risks, now);
            let payload = webhook_payload(&chat.webhook_url, &body, None);
            jobs.push(JobRequest::from_payload(Channel::Webhook, service, &payload));
        }

        jobs
    }

    /// Enqueues every channel job for this event together, then makes one
    /// immediate delivery pass.
    pub async fn notify(&self, risks: &[Risk], settings: &NotificationSettings) -> Result<NotifyOutcome> {
        let jobs = self.build_jobs(risks, settings);
        let queued = self.queue.enqueue(jobs)?;

        if queued == 0 {
            tracing::info!("No notification channels enabled");
            return Ok(NotifyOutcome::default());
        }

        let stats = self.flush().await?;
        Ok(NotifyOutcome { queued, stats })
    }

    pub async fn flush(&self) -> Result<ProcessStats> {
        self.queue.process(self.sender.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::Job;
    use crate::settings::{EmailSettings, WebhookSettings};
    use crate::store::OptionStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        jobs: Mutex<Vec<Job>>,
    }

    #[async_trait]
    impl JobSender for RecordingSender {
        async fn send(&self, job: &Job) -> std::result::Result<(), String> {
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    fn notifier(sender: Arc<RecordingSender>) -> Notifier {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        Notifier::new(
            NotificationQueue::new(OptionStore::in_memory(), clock.clone()),
            sender,
            SiteInfo {
                name: "Example".to_string(),
                url: "https://example.com".to_string(),
                admin_email: Some("admin@example.com".to_string()),
            },
            clock,
        )
    }

    fn all_channels() -> NotificationSettings {
        NotificationSettings {
            email: EmailSettings {
                enabled: true,
                recipients: vec![],
            },
            webhook: WebhookSettings {
                enabled: true,
                url: "https://hooks.example.com/generic".to_string(),
                secret: Some("topsecret".to_string()),
            },
            discord: ChatSettings {
                enabled: true,
                webhook_url: "https://discord.example.com/x".to_string(),
            },
            slack: ChatSettings {
                enabled: true,
                webhook_url: "https://slack.example.com/x".to_string(),
            },
            teams: ChatSettings {
                enabled: false,
                webhook_url: String::new(),
            },
        }
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(summary_line(1), "1 plugin needs attention");
        assert_eq!(summary_line(3), "3 plugins need attention");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00 UTC");
    }

    #[test]
    fn test_one_job_per_enabled_channel() {
        let notifier = notifier(Arc::new(RecordingSender::default()));
        let jobs = notifier.build_jobs(&[], &all_channels());

        let descriptions: Vec<&str> = jobs.iter().map(|j| j.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Email", "Webhook", "Discord", "Slack"]);
        assert_eq!(jobs[0].channel, "email");
        assert!(jobs[1..].iter().all(|j| j.channel == "webhook"));
    }

    #[test]
    fn test_email_falls_back_to_admin() {
        let notifier = notifier(Arc::new(RecordingSender::default()));
        let jobs = notifier.build_jobs(&[], &all_channels());

        let payload: EmailPayload =
            serde_json::from_value(Value::Object(jobs[0].payload.clone())).unwrap();
        assert_eq!(payload.to, vec!["admin@example.com".to_string()]);
    }

    #[test]
    fn test_generic_webhook_is_signed() {
        let notifier = notifier(Arc::new(RecordingSender::default()));
        let jobs = notifier.build_jobs(&[], &all_channels());

        let generic: WebhookPayload =
            serde_json::from_value(Value::Object(jobs[1].payload.clone())).unwrap();
        let expected = webhook::signature(&generic.body, "topsecret").unwrap();
        assert_eq!(generic.headers.get(webhook::SIGNATURE_HEADER), Some(&expected));

        let discord: WebhookPayload =
            serde_json::from_value(Value::Object(jobs[2].payload.clone())).unwrap();
        assert!(!discord.headers.contains_key(webhook::SIGNATURE_HEADER));
    }

    #[test]
    fn test_unsigned_without_secret() {
        let notifier = notifier(Arc::new(RecordingSender::default()));
        let mut settings = all_channels();
        settings.webhook.secret = None;
        let jobs = notifier.build_jobs(&[], &settings);

        let generic: WebhookPayload =
            serde_json::from_value(Value::Object(jobs[1].payload.clone())).unwrap();
        assert!(!generic.headers.contains_key(webhook::SIGNATURE_HEADER));
    }

    #[tokio::test]
    async fn test_notify_enqueues_then_drains() {
        let sender = Arc::new(RecordingSender::default());
        let notifier = notifier(sender.clone());

        let outcome = notifier.notify(&[], &all_channels()).await.unwrap();

        assert_eq!(outcome.queued, 4);
        assert_eq!(outcome.stats, ProcessStats { processed: 4, succeeded: 4 });
        assert_eq!(sender.jobs.lock().unwrap().len(), 4);
        assert!(notifier.queue().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_notify_without_channels() {
        let notifier = notifier(Arc::new(RecordingSender::default()));
        let mut settings = NotificationSettings::default();
        settings.email.enabled = false;

        let outcome = notifier.notify(&[], &settings).await.unwrap();
        assert_eq!(outcome, NotifyOutcome::default());
    }
}
