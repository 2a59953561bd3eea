//! WPScan-style vulnerability feed.
//!
//! Answers are cached per slug in the transient cache. A rate-limit or
//! server error arms a cooldown, during which lookups return nothing
//! instead of hammering the API.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::time::Duration;
use watchdog_core::source::VulnerabilityFeed;
use watchdog_core::{HttpClient, Result, TransientCache, VersionComparator, VulnerabilityRecord, WatchdogError};

pub const DEFAULT_FEED_BASE: &str = "https://wpscan.com/api/v3";
pub const CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);
pub const COOLDOWN: Duration = Duration::from_secs(60 * 60);
const COOLDOWN_KEY: &str = "wpscan_cooldown";

pub struct WpScanFeed {
    client: HttpClient,
    base_url: String,
    token: Option<String>,
    cache: Option<TransientCache>,
}

impl WpScanFeed {
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: HttpClient::new(),
            base_url: DEFAULT_FEED_BASE.to_string(),
            token: token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            cache: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_cache(mut self, cache: TransientCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    fn cache_key(slug: &str) -> String {
        format!("wpscan_{}", slug)
    }

    fn cooling_down(&self) -> Result<bool> {
        match &self.cache {
            Some(cache) => cache.exists(COOLDOWN_KEY),
            None => Ok(false),
        }
    }

    fn arm_cooldown(&self, status: u16) -> Result<()> {
        tracing::warn!(status, cooldown_secs = COOLDOWN.as_secs(), "Vulnerability feed unavailable, pausing lookups");
        if let Some(cache) = &self.cache {
            cache.set_with_ttl(COOLDOWN_KEY, &status, COOLDOWN)?;
        }
        Ok(())
    }

    /// Every vulnerability the feed knows for `slug`, fixed or not.
    async fn fetch(&self, slug: &str, token: &str) -> Result<Vec<VulnerabilityRecord>> {
        if let Some(cache) = &self.cache {
            if let Some(records) = cache.get::<Vec<VulnerabilityRecord>>(&Self::cache_key(slug))? {
                tracing::debug!(slug, "Vulnerability feed cache hit");
                return Ok(records);
            }
        }

        let url = format!("{}/plugins/{}", self.base_url, urlencoding::encode(slug));
        let authorization = format!("Token token={}", token);

        let data: Value = match self
            .client
            .get_json(&url, &[("Authorization", authorization.as_str())])
            .await
        {
            Ok(data) => data,
            Err(e) if e.status() == Some(404) => Value::Null,
            Err(e) => {
                if let Some(status) = e.status().filter(|s| *s == 429 || *s >= 500) {
                    self.arm_cooldown(status)?;
                    return Err(WatchdogError::Feed {
                        message: format!("lookup for '{}' answered HTTP {}", slug, status),
                    });
                }
                return Err(e);
            }
        };

        let records = parse_vulnerabilities(&data, slug);
        if let Some(cache) = &self.cache {
            cache.set_with_ttl(&Self::cache_key(slug), &records, CACHE_TTL)?;
        }
        Ok(records)
    }
}

#[async_trait]
impl VulnerabilityFeed for WpScanFeed {
    async fn active_vulnerabilities(
        &self,
        slug: &str,
        version: &str,
    ) -> Result<Vec<VulnerabilityRecord>> {
        let Some(token) = self.token.as_deref() else {
            return Ok(Vec::new());
        };
        if self.cooling_down()? {
            tracing::debug!(slug, "Vulnerability feed cooling down");
            return Ok(Vec::new());
        }

        let records = self.fetch(slug, token).await?;
        Ok(records
            .into_iter()
            .filter(|record| is_active(record, version))
            .collect())
    }
}

/// A vulnerability still applies unless the installed version is at or
/// past `fixed_in`. Versions that cannot be compared count as affected.
pub fn is_active(record: &VulnerabilityRecord, local_version: &str) -> bool {
    match record.fixed_in.as_deref() {
        None => true,
        Some(fixed) => !matches!(
            VersionComparator::compare(local_version, fixed),
            Some(Ordering::Equal | Ordering::Greater)
        ),
    }
}

fn parse_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Reads `{ "<slug>": { "vulnerabilities": [...] } }`.
pub fn parse_vulnerabilities(data: &Value, slug: &str) -> Vec<VulnerabilityRecord> {
    let Some(entries) = data
        .get(slug)
        .and_then(|p| p.get("vulnerabilities"))
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };

    entries
        .iter()
        .map(|entry| {
            let title = entry
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or("Unnamed vulnerability");
            let references = entry.get("references");
            let urls = string_list(references.and_then(|r| r.get("url")));
            let cve = string_list(references.and_then(|r| r.get("cve")))
                .into_iter()
                .next()
                .map(|id| {
                    if id.to_uppercase().starts_with("CVE-") {
                        id
                    } else {
                        format!("CVE-{}", id)
                    }
                });
            let fixed_in = entry
                .get("fixed_in")
                .and_then(|f| f.as_str())
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string);
            let score = entry
                .get("cvss")
                .and_then(|c| c.get("score"))
                .and_then(parse_score);

            VulnerabilityRecord::new(title, urls, fixed_in, cve, score)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use watchdog_core::types::Severity;
    use watchdog_core::{ManualClock, OptionStore};

    fn sample() -> Value {
        json!({
            "forms": {
                "friendly_name": "Forms",
                "vulnerabilities": [
                    {
                        "title": "Forms <= 1.2.0 - Reflected XSS",
                        "references": { "url": ["https://example.com/advisory"], "cve": ["2024-1234"] },
                        "cvss": { "score": "6.1", "severity": "medium" },
                        "fixed_in": "1.2.1"
                    },
                    {
                        "title": "Forms - Unauthenticated SQL Injection",
                        "cvss": { "score": 9.8 },
                        "fixed_in": null
                    }
                ]
            }
        })
    }

    #[test]
    fn test_parse_vulnerabilities() {
        let records = parse_vulnerabilities(&sample(), "forms");
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].cve.as_deref(), Some("CVE-2024-1234"));
        assert_eq!(records[0].references, vec!["https://example.com/advisory".to_string()]);
        assert_eq!(records[0].cvss_score, Some(6.1));
        assert_eq!(records[0].severity, Some(Severity::Medium));
        assert_eq!(records[0].fixed_in.as_deref(), Some("1.2.1"));

        assert_eq!(records[1].severity, Some(Severity::Severe));
        assert!(records[1].fixed_in.is_none());
        assert!(records[1].references.is_empty());
    }

    #[test]
    fn test_parse_unknown_slug() {
        assert!(parse_vulnerabilities(&sample(), "other").is_empty());
        assert!(parse_vulnerabilities(&Value::Null, "forms").is_empty());
    }

    #[test]
    fn test_active_vulnerabilities_by_version() {
        let records = parse_vulnerabilities(&sample(), "forms");

        assert!(is_active(&records[0], "1.2.0"));
        assert!(!is_active(&records[0], "1.2.1"));
        assert!(!is_active(&records[0], "1.3"));
        assert!(is_active(&records[0], "trunk"));
        assert!(is_active(&records[1], "99.0"));
    }

    #[test]
    fn test_leading_zero_fix_version() {
        let record = VulnerabilityRecord::new("Forms - CSRF", Vec::new(), Some("1.08".to_string()), None, Some(5.0));

        assert!(is_active(&record, "1.07"));
        assert!(!is_active(&record, "1.08"));
        assert!(!is_active(&record, "1.10"));
    }

    #[tokio::test]
    async fn test_no_token_disables_feed() {
        let feed = WpScanFeed::new(Some("  ".to_string()));
        assert!(!feed.is_enabled());
        assert!(feed.active_vulnerabilities("forms", "1.0").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cached_answer_is_used_and_filtered() {
        let cache = TransientCache::new(OptionStore::in_memory(), Arc::new(ManualClock::new(1_000)));
        cache
            .set_with_ttl("wpscan_forms", &parse_vulnerabilities(&sample(), "forms"), CACHE_TTL)
            .unwrap();

        // Unroutable base: a cache miss would fail the lookup.
        let feed = WpScanFeed::new(Some("token".to_string()))
            .with_base_url("http://127.0.0.1:9")
            .with_cache(cache);

        let active = feed.active_vulnerabilities("forms", "1.2.1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Forms - Unauthenticated SQL Injection");
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_lookups() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = TransientCache::new(OptionStore::in_memory(), clock.clone());
        let feed = WpScanFeed::new(Some("token".to_string()))
            .with_base_url("http://127.0.0.1:9")
            .with_cache(cache.clone());

        feed.arm_cooldown(429).unwrap();
        assert!(feed.active_vulnerabilities("forms", "1.0").await.unwrap().is_empty());

        clock.advance(COOLDOWN.as_secs() as i64 + 1);
        assert!(!cache.exists(COOLDOWN_KEY).unwrap());
    }
}
