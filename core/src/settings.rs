//! Typed plugin settings.
//!
//! Settings are stored as one JSON object. Reading merges the stored object
//! over [`Settings::default`] (every field is `#[serde(default)]`), so a
//! partially written or older document still loads. Older flat field names
//! are folded into the current shape before deserializing. A field that
//! still cannot be read falls back to its default on its own; the rest of
//! the document is kept and nothing is written back.

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{keys, OptionStore};
use chrono::NaiveTime;
use rand::distributions::Alphanumeric;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

pub const DAY_IN_SECONDS: i64 = 24 * 60 * 60;
pub const WEEK_IN_SECONDS: i64 = 7 * DAY_IN_SECONDS;
pub const TESTING_INTERVAL: i64 = 10 * 60;
pub const TESTING_DURATION: i64 = 60 * 60;

pub const MIN_RETENTION: u8 = 1;
pub const MAX_RETENTION: u8 = 15;
pub const DEFAULT_RETENTION: u8 = 5;
const DEFAULT_TIME: &str = "08:00";
const SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    /// Accelerated schedule for checking delivery; reverts to daily.
    Testing,
    Manual,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Testing => "testing",
            Frequency::Manual => "manual",
        }
    }

    /// Seconds between automatic scans; `None` for manual.
    pub fn interval(&self) -> Option<i64> {
        match self {
            Frequency::Daily => Some(DAY_IN_SECONDS),
            Frequency::Weekly => Some(WEEK_IN_SECONDS),
            Frequency::Testing => Some(TESTING_INTERVAL),
            Frequency::Manual => None,
        }
    }

    /// Name of the host cron schedule the scan is registered under.
    pub fn schedule_name(&self) -> Option<&'static str> {
        match self {
            Frequency::Daily => Some("daily"),
            Frequency::Weekly => Some("weekly"),
            Frequency::Testing => Some("watchdog_testing"),
            Frequency::Manual => None,
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "testing" => Ok(Frequency::Testing),
            "manual" => Ok(Frequency::Manual),
            other => Err(format!("unknown frequency '{}'", other)),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    #[default]
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub fn to_chrono(self) -> chrono::Weekday {
        match self {
            Weekday::Monday => chrono::Weekday::Mon,
            Weekday::Tuesday => chrono::Weekday::Tue,
            Weekday::Wednesday => chrono::Weekday::Wed,
            Weekday::Thursday => chrono::Weekday::Thu,
            Weekday::Friday => chrono::Weekday::Fri,
            Weekday::Saturday => chrono::Weekday::Sat,
            Weekday::Sunday => chrono::Weekday::Sun,
        }
    }
}

impl FromStr for Weekday {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "monday" | "mon" => Ok(Weekday::Monday),
            "tuesday" | "tue" => Ok(Weekday::Tuesday),
            "wednesday" | "wed" => Ok(Weekday::Wednesday),
            "thursday" | "thu" => Ok(Weekday::Thursday),
            "friday" | "fri" => Ok(Weekday::Friday),
            "saturday" | "sat" => Ok(Weekday::Saturday),
            "sunday" | "sun" => Ok(Weekday::Sunday),
            other => Err(format!("unknown weekday '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EmailSettings {
    pub enabled: bool,
    pub recipients: Vec<String>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub url: String,
    /// HMAC-SHA256 key for the `X-Watchdog-Signature` header.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ChatSettings {
    pub enabled: bool,
    pub webhook_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NotificationSettings {
    pub email: EmailSettings,
    pub webhook: WebhookSettings,
    pub discord: ChatSettings,
    pub slack: ChatSettings,
    pub teams: ChatSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Settings {
    #[serde(alias = "scan_frequency")]
    pub frequency: Frequency,
    /// Local time of day for daily scans, `HH:MM`.
    pub daily_time: String,
    pub weekly_day: Weekday,
    pub weekly_time: String,
    pub testing_expires_at: Option<i64>,
    /// Number of scan snapshots kept, 1 to 15.
    #[serde(alias = "retention")]
    pub history_retention: u8,
    pub notifications: NotificationSettings,
    pub cron_secret: String,
    pub last_manual_notification_at: Option<i64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frequency: Frequency::Daily,
            daily_time: DEFAULT_TIME.to_string(),
            weekly_day: Weekday::Monday,
            weekly_time: DEFAULT_TIME.to_string(),
            testing_expires_at: None,
            history_retention: DEFAULT_RETENTION,
            notifications: NotificationSettings::default(),
            cron_secret: String::new(),
            last_manual_notification_at: None,
        }
    }
}

pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

pub fn clamp_retention(value: u8) -> u8 {
    value.clamp(MIN_RETENTION, MAX_RETENTION)
}

/// One address with an `@`, no whitespace and no control characters, so it
/// cannot smuggle extra headers into an outgoing message.
pub fn is_plain_address(address: &str) -> bool {
    address.contains('@')
        && !address
            .chars()
            .any(|c| c.is_control() || c.is_whitespace() || c == ',' || c == ';')
}

impl Settings {
    /// Corrects out-of-range or malformed values, returning a notice for
    /// every correction made.
    pub fn validate(&mut self) -> Vec<String> {
        let mut notices = Vec::new();

        let retention = clamp_retention(self.history_retention);
        if retention != self.history_retention {
            notices.push(format!(
                "History retention must be between {} and {}; using {}.",
                MIN_RETENTION, MAX_RETENTION, retention
            ));
            self.history_retention = retention;
        }

        for (label, time) in [
            ("Daily", &mut self.daily_time),
            ("Weekly", &mut self.weekly_time),
        ] {
            match parse_time_of_day(time) {
                Some(parsed) => *time = parsed.format("%H:%M").to_string(),
                None => {
                    notices.push(format!(
                        "{} scan time '{}' is not a valid HH:MM time; using {}.",
                        label, time, DEFAULT_TIME
                    ));
                    *time = DEFAULT_TIME.to_string();
                }
            }
        }

        let email = &mut self.notifications.email;
        let mut recipients: Vec<String> = Vec::new();
        for raw in &email.recipients {
            let recipient = raw.trim();
            if recipient.is_empty() {
                continue;
            }
            if !is_plain_address(recipient) {
                notices.push(format!(
                    "Ignoring invalid email address '{}'.",
                    recipient.escape_debug()
                ));
                continue;
            }
            if !recipients.iter().any(|r| r.eq_ignore_ascii_case(recipient)) {
                recipients.push(recipient.to_string());
            }
        }
        email.recipients = recipients;

        let webhook = &mut self.notifications.webhook;
        webhook.url = webhook.url.trim().to_string();
        if webhook.secret.as_deref().is_some_and(|s| s.trim().is_empty()) {
            webhook.secret = None;
        }

        for chat in [
            &mut self.notifications.discord,
            &mut self.notifications.slack,
            &mut self.notifications.teams,
        ] {
            chat.webhook_url = chat.webhook_url.trim().to_string();
        }

        if self.cron_secret.trim().is_empty() {
            notices.push("Cron secret was missing and has been regenerated.".to_string());
            self.cron_secret = generate_secret();
        }

        notices
    }

    pub fn testing_expired(&self, now: i64) -> bool {
        self.frequency == Frequency::Testing
            && self.testing_expires_at.is_some_and(|expires| now >= expires)
    }
}

/// Folds flat field names used by earlier releases into the nested shape.
fn migrate_legacy_fields(value: &mut Value) {
    let Some(object) = value.as_object_mut() else {
        return;
    };

    for (legacy, current) in [("scan_frequency", "frequency"), ("retention", "history_retention")] {
        if let Some(old) = object.remove(legacy) {
            object.entry(current).or_insert(old);
        }
    }

    let legacy_recipients = object
        .remove("email_recipients")
        .or_else(|| object.remove("notify_email"));
    if let Some(recipients) = legacy_recipients {
        let list: Vec<String> = match recipients {
            Value::String(s) => s
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect(),
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        let notifications = object
            .entry("notifications")
            .or_insert_with(|| json!({}));
        if let Some(notifications) = notifications.as_object_mut() {
            let email = notifications.entry("email").or_insert_with(|| json!({}));
            if let Some(email) = email.as_object_mut() {
                email.entry("recipients").or_insert_with(|| json!(list));
            }
        }
    }

    if let Some(url) = object.remove("webhook_url") {
        let notifications = object
            .entry("notifications")
            .or_insert_with(|| json!({}));
        if let Some(notifications) = notifications.as_object_mut() {
            let webhook = notifications.entry("webhook").or_insert_with(|| json!({}));
            if let Some(webhook) = webhook.as_object_mut() {
                let enabled = url.as_str().is_some_and(|u| !u.trim().is_empty());
                webhook.entry("url").or_insert(url);
                webhook.entry("enabled").or_insert(json!(enabled));
            }
        }
    }
}

/// Deserializes a stored document, reading field by field when the document
/// as a whole does not fit. Unknown fields are ignored; unreadable ones keep
/// their default.
fn read_stored(raw: Value) -> Settings {
    let error = match serde_json::from_value::<Settings>(raw.clone()) {
        Ok(settings) => return settings,
        Err(e) => e,
    };
    tracing::warn!(error = %error, "Stored settings do not fit, reading them field by field");

    let Ok(mut merged) = serde_json::to_value(Settings::default()) else {
        return Settings::default();
    };

    let mut fields = Vec::new();
    collect_fields(String::new(), raw, &mut fields);

    for (pointer, value) in fields {
        if merged.pointer(&pointer).is_none() {
            continue;
        }

        let accepted = std::iter::once(value.clone())
            .chain(coerce(&value))
            .find_map(|candidate| {
                let mut document = merged.clone();
                *document.pointer_mut(&pointer)? = candidate;
                serde_json::from_value::<Settings>(document.clone())
                    .ok()
                    .map(|_| document)
            });

        match accepted {
            Some(document) => merged = document,
            None => tracing::warn!(field = %pointer, value = %value, "Ignoring unreadable setting"),
        }
    }

    serde_json::from_value(merged).unwrap_or_default()
}

/// Flattens nested objects into JSON pointers. Arrays and scalars are leaves.
fn collect_fields(prefix: String, value: Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, value) in map {
                let token = key.replace('~', "~0").replace('/', "~1");
                collect_fields(format!("{}/{}", prefix, token), value, out);
            }
        }
        other if !prefix.is_empty() => out.push((prefix, other)),
        _ => {}
    }
}

/// Other spellings of a scalar worth trying: numeric or boolean strings,
/// case-folded names and numbers written where text is expected.
fn coerce(value: &Value) -> Vec<Value> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            let mut candidates = Vec::new();
            if let Ok(n) = trimmed.parse::<u64>() {
                candidates.push(Value::from(n));
            } else if let Ok(n) = trimmed.parse::<i64>() {
                candidates.push(Value::from(n));
            }
            if let Ok(b) = trimmed.parse::<bool>() {
                candidates.push(Value::Bool(b));
            }
            let folded = trimmed.to_lowercase();
            if folded != *s {
                candidates.push(Value::String(folded));
            }
            candidates
        }
        Value::Number(n) => vec![Value::String(n.to_string())],
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub settings: Settings,
    pub notices: Vec<String>,
}

#[derive(Clone)]
pub struct SettingsRepository {
    store: OptionStore,
    clock: Arc<dyn Clock>,
}

impl SettingsRepository {
    pub fn new(store: OptionStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Loads settings. Nothing is written back, except a freshly generated
    /// cron secret when none is stored yet. The secret is added to the
    /// stored document as is, so fields this release cannot read survive.
    pub fn load(&self) -> Result<Settings> {
        let stored = self.store.get_raw(keys::SETTINGS)?;
        let mut settings = match stored.clone() {
            Some(mut raw) => {
                migrate_legacy_fields(&mut raw);
                read_stored(raw)
            }
            None => Settings::default(),
        };

        settings.history_retention = clamp_retention(settings.history_retention);

        if settings.cron_secret.trim().is_empty() {
            settings.cron_secret = generate_secret();
            match stored {
                None => self.store.set(keys::SETTINGS, &settings)?,
                Some(Value::Object(mut document)) => {
                    document.insert("cron_secret".to_string(), json!(settings.cron_secret));
                    self.store.set(keys::SETTINGS, &document)?;
                }
                Some(_) => {
                    tracing::warn!("Stored settings are not an object, cron secret kept in memory only");
                    return Ok(settings);
                }
            }
            tracing::info!("Generated cron secret");
        }

        Ok(settings)
    }

    /// Validates and stores settings coming from the admin. Saving with the
    /// testing frequency (re-)arms its expiry.
    pub fn save(&self, mut settings: Settings) -> Result<SaveOutcome> {
        let notices = settings.validate();

        if settings.frequency == Frequency::Testing {
            settings.testing_expires_at = Some(self.clock.now() + TESTING_DURATION);
        } else {
            settings.testing_expires_at = None;
        }

        self.store.set(keys::SETTINGS, &settings)?;
        Ok(SaveOutcome { settings, notices })
    }

    /// Internal write that skips validation and testing re-arming.
    pub fn update<F>(&self, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.load()?;
        f(&mut settings);
        self.store.set(keys::SETTINGS, &settings)?;
        Ok(settings)
    }

    pub fn regenerate_secret(&self) -> Result<String> {
        let settings = self.update(|s| s.cron_secret = generate_secret())?;
        Ok(settings.cron_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::store::KeyValueStore;

    fn repository() -> (SettingsRepository, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        let repo = SettingsRepository::new(
            OptionStore::new(backend.clone()),
            Arc::new(ManualClock::new(10_000)),
        );
        (repo, backend)
    }

    #[test]
    fn test_defaults_when_nothing_stored() {
        let (repo, _) = repository();
        let settings = repo.load().unwrap();

        assert_eq!(settings.frequency, Frequency::Daily);
        assert_eq!(settings.history_retention, DEFAULT_RETENTION);
        assert_eq!(settings.daily_time, "08:00");
        assert_eq!(settings.cron_secret.len(), SECRET_LENGTH);
    }

    #[test]
    fn test_secret_is_generated_once() {
        let (repo, backend) = repository();
        let first = repo.load().unwrap();
        assert!(backend.get(keys::SETTINGS).unwrap().is_some());

        let second = repo.load().unwrap();
        assert_eq!(first.cron_secret, second.cron_secret);
    }

    #[test]
    fn test_stored_values_override_defaults() {
        let (repo, backend) = repository();
        backend
            .set(keys::SETTINGS, json!({"frequency": "weekly", "cron_secret": "s3cret"}))
            .unwrap();

        let settings = repo.load().unwrap();
        assert_eq!(settings.frequency, Frequency::Weekly);
        assert_eq!(settings.cron_secret, "s3cret");
        assert_eq!(settings.weekly_time, "08:00");
    }

    #[test]
    fn test_reading_does_not_write_back() {
        let (repo, backend) = repository();
        let stored = json!({"frequency": "weekly", "cron_secret": "s3cret", "history_retention": 40});
        backend.set(keys::SETTINGS, stored.clone()).unwrap();

        let settings = repo.load().unwrap();
        assert_eq!(settings.history_retention, MAX_RETENTION);
        assert_eq!(backend.get(keys::SETTINGS).unwrap(), Some(stored));
    }

    #[test]
    fn test_legacy_fields_are_migrated() {
        let (repo, backend) = repository();
        backend
            .set(
                "wp_watchdog_settings",
                json!({
                    "scan_frequency": "manual",
                    "retention": 3,
                    "notify_email": "ops@example.com, dev@example.com",
                    "webhook_url": "https://hooks.example.com/x",
                    "cron_secret": "abc"
                }),
            )
            .unwrap();

        let settings = repo.load().unwrap();
        assert_eq!(settings.frequency, Frequency::Manual);
        assert_eq!(settings.history_retention, 3);
        assert_eq!(
            settings.notifications.email.recipients,
            vec!["ops@example.com".to_string(), "dev@example.com".to_string()]
        );
        assert_eq!(settings.notifications.webhook.url, "https://hooks.example.com/x");
        assert!(settings.notifications.webhook.enabled);
    }

    #[test]
    fn test_unreadable_fields_fall_back_alone() {
        let (repo, backend) = repository();
        let stored = json!({
            "frequency": "weekly",
            "history_retention": "3",
            "cron_secret": "keepme",
            "notifications": {
                "webhook": {"enabled": true, "url": "https://hooks.example.com/w"}
            }
        });
        backend.set(keys::SETTINGS, stored.clone()).unwrap();

        let settings = repo.load().unwrap();
        assert_eq!(settings.frequency, Frequency::Weekly);
        assert_eq!(settings.history_retention, 3);
        assert_eq!(settings.cron_secret, "keepme");
        assert!(settings.notifications.webhook.enabled);
        assert_eq!(settings.notifications.webhook.url, "https://hooks.example.com/w");
        assert_eq!(backend.get(keys::SETTINGS).unwrap(), Some(stored));
    }

    #[test]
    fn test_unknown_frequency_uses_default() {
        let (repo, backend) = repository();
        let stored = json!({
            "frequency": "fortnightly",
            "weekly_day": "Friday",
            "history_retention": 300,
            "cron_secret": "keepme",
            "notifications": {"email": {"recipients": ["ops@example.com"], "enabled": "yes"}}
        });
        backend.set(keys::SETTINGS, stored.clone()).unwrap();

        let settings = repo.load().unwrap();
        assert_eq!(settings.frequency, Frequency::Daily);
        assert_eq!(settings.weekly_day, Weekday::Friday);
        assert_eq!(settings.history_retention, DEFAULT_RETENTION);
        assert!(settings.notifications.email.enabled);
        assert_eq!(settings.notifications.email.recipients, vec!["ops@example.com".to_string()]);
        assert_eq!(settings.cron_secret, "keepme");
        assert_eq!(backend.get(keys::SETTINGS).unwrap(), Some(stored));
    }

    #[test]
    fn test_missing_secret_is_added_to_stored_document() {
        let (repo, backend) = repository();
        backend
            .set(keys::SETTINGS, json!({"frequency": 7, "custom": {"kept": true}}))
            .unwrap();

        let settings = repo.load().unwrap();
        assert_eq!(settings.frequency, Frequency::Daily);

        let stored = backend.get(keys::SETTINGS).unwrap().unwrap();
        assert_eq!(stored["frequency"], json!(7));
        assert_eq!(stored["custom"], json!({"kept": true}));
        assert_eq!(stored["cron_secret"], json!(settings.cron_secret));
        assert_eq!(repo.load().unwrap().cron_secret, settings.cron_secret);
    }

    #[test]
    fn test_recipients_with_header_breaks_are_dropped() {
        let mut settings = Settings {
            cron_secret: "x".to_string(),
            ..Settings::default()
        };
        settings.notifications.email.recipients = vec![
            "ops@example.com\r\nBcc: evil@example.com".to_string(),
            "a@example.com, b@example.com".to_string(),
            "dev@example.com".to_string(),
        ];

        let notices = settings.validate();
        assert_eq!(settings.notifications.email.recipients, vec!["dev@example.com".to_string()]);
        assert_eq!(notices.len(), 2);
    }

    #[test]
    fn test_validate_corrects_values() {
        let mut settings = Settings {
            history_retention: 0,
            daily_time: "25:99".to_string(),
            ..Settings::default()
        };
        settings.notifications.email.recipients = vec![
            " a@example.com ".to_string(),
            "A@example.com".to_string(),
            "".to_string(),
            "nope".to_string(),
        ];

        let notices = settings.validate();

        assert_eq!(settings.history_retention, 1);
        assert_eq!(settings.daily_time, "08:00");
        assert_eq!(settings.notifications.email.recipients, vec!["a@example.com".to_string()]);
        assert!(!settings.cron_secret.is_empty());
        assert_eq!(notices.len(), 4);
    }

    #[test]
    fn test_saving_testing_arms_expiry() {
        let (repo, _) = repository();
        let settings = Settings {
            frequency: Frequency::Testing,
            cron_secret: "x".to_string(),
            ..Settings::default()
        };

        let outcome = repo.save(settings).unwrap();
        assert_eq!(outcome.settings.testing_expires_at, Some(10_000 + TESTING_DURATION));

        let mut back = outcome.settings.clone();
        back.frequency = Frequency::Daily;
        let outcome = repo.save(back).unwrap();
        assert_eq!(outcome.settings.testing_expires_at, None);
    }

    #[test]
    fn test_testing_expired() {
        let settings = Settings {
            frequency: Frequency::Testing,
            testing_expires_at: Some(100),
            ..Settings::default()
        };
        assert!(!settings.testing_expired(99));
        assert!(settings.testing_expired(100));
    }
}
