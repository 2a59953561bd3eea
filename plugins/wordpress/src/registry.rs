use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use watchdog_core::source::{PluginDirectory, RemotePlugin};
use watchdog_core::{HttpClient, Result};

pub const DEFAULT_API_BASE: &str = "https://api.wordpress.org";

/// Client for the WordPress.org plugin information API.
pub struct WordPressOrgClient {
    client: HttpClient,
    base_url: String,
}

impl Default for WordPressOrgClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WordPressOrgClient {
    pub fn new() -> Self {
        Self {
            client: HttpClient::new(),
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    pub fn info_url(&self, slug: &str) -> String {
        format!(
            "{}/plugins/info/1.2/?action=plugin_information&request[slug]={}&request[fields][sections]=1",
            self.base_url,
            urlencoding::encode(slug)
        )
    }
}

#[async_trait]
impl PluginDirectory for WordPressOrgClient {
    async fn lookup(&self, slug: &str) -> Result<Option<RemotePlugin>> {
        let url = self.info_url(slug);

        let data: Value = match self.client.get_json(&url, &[]).await {
            Ok(data) => data,
            Err(e) if e.status() == Some(404) => {
                tracing::debug!(slug, "Plugin is not listed in the directory");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(parse_plugin_information(&data))
    }
}

/// Reads a `plugin_information` answer. An `error` member means the slug is
/// unknown to the directory.
pub fn parse_plugin_information(data: &Value) -> Option<RemotePlugin> {
    if data.get("error").is_some() {
        return None;
    }

    let version = data
        .get("version")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())?
        .to_string();

    let changelog = data
        .get("sections")
        .and_then(|s| s.get("changelog"))
        .and_then(|c| c.as_str())
        .and_then(|html| extract_changelog_entry(html, &version));

    Some(RemotePlugin { version, changelog })
}

fn heading_pattern() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| Regex::new(r"(?is)<h[1-6][^>]*>(.*?)</h[1-6]>").expect("valid heading pattern"))
}

fn version_token_pattern() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"[0-9]+(?:\.[0-9A-Za-z]+)*").expect("valid version pattern"))
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"))
}

/// The changelog HTML between the heading naming `version` and the next
/// heading. Version tokens must match exactly, so `1.2` does not pick up a
/// `1.2.1` heading.
pub fn extract_changelog_entry(html: &str, version: &str) -> Option<String> {
    let headings: Vec<_> = heading_pattern().captures_iter(html).collect();

    for (i, heading) in headings.iter().enumerate() {
        let (Some(whole), Some(inner)) = (heading.get(0), heading.get(1)) else {
            continue;
        };
        let title = tag_pattern().replace_all(inner.as_str(), " ");
        let names_version = version_token_pattern()
            .find_iter(&title)
            .any(|token| token.as_str() == version);
        if !names_version {
            continue;
        }

        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(html.len());
        let entry = html[whole.end()..end].trim();

        return (!entry.is_empty()).then(|| entry.to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CHANGELOG: &str = "<h4>2.1.0</h4>\n<ul><li>Fixed a security issue in the upload handler</li></ul>\n\
        <h4>2.0.10</h4>\n<ul><li>Tweak</li></ul>\n<h4>2.0.1</h4>\n<ul><li>Initial</li></ul>";

    #[test]
    fn test_extracts_entry_for_version() {
        let entry = extract_changelog_entry(CHANGELOG, "2.1.0").unwrap();
        assert_eq!(entry, "<ul><li>Fixed a security issue in the upload handler</li></ul>");
    }

    #[test]
    fn test_version_tokens_match_exactly() {
        let entry = extract_changelog_entry(CHANGELOG, "2.0.1").unwrap();
        assert_eq!(entry, "<ul><li>Initial</li></ul>");

        assert!(extract_changelog_entry(CHANGELOG, "2.0").is_none());
    }

    #[test]
    fn test_heading_with_date_and_markup() {
        let html = "<h3><strong>Version 3.4</strong> (2024-01-02)</h3><p>Hardening</p><h3>3.3</h3><p>Old</p>";
        assert_eq!(extract_changelog_entry(html, "3.4").unwrap(), "<p>Hardening</p>");
    }

    #[test]
    fn test_parse_plugin_information() {
        let data = json!({
            "name": "Forms",
            "slug": "forms",
            "version": "2.1.0",
            "sections": { "description": "<p>Forms</p>", "changelog": CHANGELOG }
        });

        let remote = parse_plugin_information(&data).unwrap();
        assert_eq!(remote.version, "2.1.0");
        assert!(remote.changelog.unwrap().contains("security issue"));
    }

    #[test]
    fn test_parse_error_answer_is_not_listed() {
        let data = json!({ "error": "Plugin not found." });
        assert!(parse_plugin_information(&data).is_none());
        assert!(parse_plugin_information(&json!({ "sections": {} })).is_none());
    }

    #[test]
    fn test_info_url() {
        let client = WordPressOrgClient::new().with_base_url("http://localhost:8080/");
        assert_eq!(
            client.info_url("contact form"),
            "http://localhost:8080/plugins/info/1.2/?action=plugin_information&request[slug]=contact%20form&request[fields][sections]=1"
        );
    }
}
