use super::{EmailPayload, WebhookPayload};
use crate::http::HttpClient;
use crate::queue::{Channel, Job, JobSender};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Outbound mail hand-off. Returns an error message on failure.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailPayload) -> Result<(), String>;
}

/// Sends queued jobs over the real transports: email through a [`Mailer`],
/// everything else as an HTTP POST.
pub struct DeliverySender {
    http: HttpClient,
    mailer: Option<Arc<dyn Mailer>>,
}

impl DeliverySender {
    pub fn new(http: HttpClient, mailer: Option<Arc<dyn Mailer>>) -> Self {
        Self { http, mailer }
    }

    async fn send_email(&self, payload: EmailPayload) -> Result<(), String> {
        if payload.to.iter().all(|r| r.trim().is_empty()) {
            return Err("No email recipients configured".to_string());
        }

        let Some(mailer) = &self.mailer else {
            return Err("No mail transport configured".to_string());
        };

        mailer.send(&payload).await
    }

    async fn send_webhook(&self, payload: WebhookPayload) -> Result<(), String> {
        if payload.url.trim().is_empty() {
            return Err("Webhook URL missing".to_string());
        }

        match self
            .http
            .post_body(&payload.url, payload.body, &payload.headers)
            .await
        {
            Ok(status) if (200..300).contains(&status) => Ok(()),
            Ok(status) => Err(format!("Webhook responded with HTTP {}", status)),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn decode<T: DeserializeOwned>(job: &Job) -> Result<T, String> {
    serde_json::from_value(Value::Object(job.payload.clone()))
        .map_err(|e| format!("Malformed {} payload: {}", job.channel, e))
}

#[async_trait]
impl JobSender for DeliverySender {
    async fn send(&self, job: &Job) -> Result<(), String> {
        match job.channel {
            Channel::Email => self.send_email(decode(job)?).await,
            Channel::Webhook => self.send_webhook(decode(job)?).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingMailer {
        sent: Mutex<Vec<EmailPayload>>,
    }

    #[async_trait]
    impl Mailer for CapturingMailer {
        async fn send(&self, message: &EmailPayload) -> Result<(), String> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn job(channel: Channel, payload: Value) -> Job {
        Job {
            id: "1".to_string(),
            channel,
            description: channel.to_string(),
            payload: payload.as_object().cloned().unwrap_or_else(Map::new),
            attempts: 0,
            next_attempt_at: 0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_missing_recipients() {
        let sender = DeliverySender::new(HttpClient::new(), Some(Arc::new(CapturingMailer::default())));
        let result = sender
            .send(&job(Channel::Email, json!({"to": [], "subject": "s", "html": "h"})))
            .await;
        assert_eq!(result, Err("No email recipients configured".to_string()));
    }

    #[tokio::test]
    async fn test_missing_webhook_url() {
        let sender = DeliverySender::new(HttpClient::new(), None);
        let result = sender
            .send(&job(Channel::Webhook, json!({"url": " ", "body": "{}"})))
            .await;
        assert_eq!(result, Err("Webhook URL missing".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let sender = DeliverySender::new(HttpClient::new(), None);
        let result = sender.send(&job(Channel::Webhook, json!({"body": "{}"}))).await;
        assert!(result.unwrap_err().starts_with("Malformed webhook payload"));
    }

    #[tokio::test]
    async fn test_email_goes_through_mailer() {
        let mailer = Arc::new(CapturingMailer::default());
        let sender = DeliverySender::new(HttpClient::new(), Some(mailer.clone()));

        sender
            .send(&job(
                Channel::Email,
                json!({"to": ["ops@example.com"], "subject": "s", "html": "<p>h</p>"}),
            ))
            .await
            .unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);
    }
}
