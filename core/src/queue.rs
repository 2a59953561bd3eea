//! Persistent notification delivery queue.
//!
//! Jobs live in one option as a flat list. Each [`NotificationQueue::process`]
//! call walks the list once: jobs not yet due are kept, due jobs are sent;
//! failures are rescheduled with exponential backoff until they reach
//! [`MAX_ATTEMPTS`], at which point they move into the single dead-letter
//! slot (last failure wins).

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{keys, OptionStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_ATTEMPTS: u32 = 5;
pub const BASE_DELAY: i64 = 300;
pub const MAX_DELAY: i64 = 21_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Webhook,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Webhook => "webhook",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "webhook" => Ok(Channel::Webhook),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub channel: Channel,
    pub description: String,
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub attempts: u32,
    pub next_attempt_at: i64,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// A job as handed to [`NotificationQueue::enqueue`], before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub channel: String,
    pub description: String,
    pub payload: Map<String, Value>,
}

impl JobRequest {
    pub fn new(channel: Channel, description: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            channel: channel.as_str().to_string(),
            description: description.into(),
            payload,
        }
    }

    /// Builds a request from any serializable payload struct. Payloads that
    /// do not serialize to a JSON object become empty and are later dropped.
    pub fn from_payload<P: Serialize>(channel: Channel, description: impl Into<String>, payload: &P) -> Self {
        let payload = match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self::new(channel, description, payload)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub channel: Channel,
    pub description: String,
    pub payload: Map<String, Value>,
    pub last_error: Option<String>,
    pub failed_at: i64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub processed: usize,
    pub succeeded: usize,
}

/// Delivers one job. `Ok(())` is the only success; any error message makes
/// the attempt count as failed.
#[async_trait]
pub trait JobSender: Send + Sync {
    async fn send(&self, job: &Job) -> std::result::Result<(), String>;
}

/// Seconds to wait after the `attempts`-th failure.
pub fn backoff_delay(attempts: u32) -> i64 {
    let exponent = attempts.saturating_sub(1).min(32);
    BASE_DELAY.saturating_mul(1i64 << exponent).min(MAX_DELAY)
}

#[derive(Clone)]
pub struct NotificationQueue {
    store: OptionStore,
    clock: Arc<dyn Clock>,
}

impl NotificationQueue {
    pub fn new(store: OptionStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn jobs(&self) -> Result<Vec<Job>> {
        self.store.get_or_default(keys::QUEUE)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.jobs()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn normalize(&self, request: JobRequest, now: i64) -> Option<Job> {
        if request.channel.trim().is_empty() || request.payload.is_empty() {
            return None;
        }

        let channel = match Channel::from_str(&request.channel) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping notification job");
                return None;
            }
        };

        let description = if request.description.trim().is_empty() {
            channel.as_str().to_string()
        } else {
            request.description
        };

        Some(Job {
            id: Uuid::new_v4().to_string(),
            channel,
            description,
            payload: request.payload,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
        })
    }

    /// Appends jobs, silently dropping malformed ones. Returns how many were
    /// queued.
    pub fn enqueue(&self, requests: Vec<JobRequest>) -> Result<usize> {
        let now = self.clock.now();
        let new_jobs: Vec<Job> = requests
            .into_iter()
            .filter_map(|r| self.normalize(r, now))
            .collect();

        if new_jobs.is_empty() {
            return Ok(0);
        }

        let count = new_jobs.len();
        let mut jobs = self.jobs()?;
        jobs.extend(new_jobs);
        self.store.set(keys::QUEUE, &jobs)?;

        tracing::debug!(count, "Queued notification jobs");
        Ok(count)
    }

    /// One pass over the queue. Jobs that become due while the pass runs are
    /// left for the next call.
    pub async fn process(&self, sender: &dyn JobSender) -> Result<ProcessStats> {
        let jobs = self.jobs()?;
        if jobs.is_empty() {
            return Ok(ProcessStats::default());
        }

        let now = self.clock.now();
        let mut stats = ProcessStats::default();
        let mut remaining = Vec::with_capacity(jobs.len());
        let mut dead_letter: Option<DeadLetter> = None;

        for mut job in jobs {
            if job.next_attempt_at > now {
                remaining.push(job);
                continue;
            }

            stats.processed += 1;

            match sender.send(&job).await {
                Ok(()) => {
                    stats.succeeded += 1;
                    tracing::info!(job = %job.id, description = %job.description, "Notification delivered");
                }
                Err(message) => {
                    job.attempts += 1;
                    job.last_error = Some(message.clone());

                    if job.attempts >= MAX_ATTEMPTS {
                        tracing::error!(
                            job = %job.id,
                            description = %job.description,
                            attempts = job.attempts,
                            error = %message,
                            "Notification failed permanently"
                        );
                        dead_letter = Some(DeadLetter {
                            channel: job.channel,
                            description: job.description,
                            payload: job.payload,
                            last_error: job.last_error,
                            failed_at: now,
                            attempts: job.attempts,
                        });
                    } else {
                        job.next_attempt_at = now + backoff_delay(job.attempts);
                        tracing::warn!(
                            job = %job.id,
                            description = %job.description,
                            attempts = job.attempts,
                            retry_at = job.next_attempt_at,
                            error = %message,
                            "Notification failed, will retry"
                        );
                        remaining.push(job);
                    }
                }
            }
        }

        self.store.set(keys::QUEUE, &remaining)?;
        if let Some(record) = dead_letter {
            self.store.set(keys::DEAD_LETTER, &record)?;
        }

        Ok(stats)
    }

    pub fn last_failed(&self) -> Result<Option<DeadLetter>> {
        self.store.get(keys::DEAD_LETTER)
    }

    pub fn clear_last_failed(&self) -> Result<()> {
        self.store.delete(keys::DEAD_LETTER)
    }

    /// Moves the dead-letter job back into the live queue as a fresh job.
    /// Returns `false` when the slot is empty.
    pub fn requeue_last_failed(&self) -> Result<bool> {
        let Some(failed) = self.last_failed()? else {
            return Ok(false);
        };

        let now = self.clock.now();
        let mut jobs = self.jobs()?;
        jobs.push(Job {
            id: Uuid::new_v4().to_string(),
            channel: failed.channel,
            description: failed.description,
            payload: failed.payload,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
        });

        self.store.set(keys::QUEUE, &jobs)?;
        self.clear_last_failed()?;
        Ok(true)
    }
}
