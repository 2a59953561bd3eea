use crate::detector::WordPressInventory;
use crate::feed::{WpScanFeed, DEFAULT_FEED_BASE};
use crate::registry::{WordPressOrgClient, DEFAULT_API_BASE};
use std::path::PathBuf;
use watchdog_core::source::{Inventory, PluginDirectory, Provider, VulnerabilityFeed};
use watchdog_core::TransientCache;

/// Data sources for a WordPress install: the plugins directory on disk,
/// WordPress.org for release data and WPScan for vulnerabilities.
pub struct WordPressProvider {
    plugins_dir: PathBuf,
    api_base: String,
    feed_base: String,
    feed_token: Option<String>,
    cache: Option<TransientCache>,
}

impl WordPressProvider {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            feed_base: DEFAULT_FEED_BASE.to_string(),
            feed_token: None,
            cache: None,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_feed_base(mut self, base: impl Into<String>) -> Self {
        self.feed_base = base.into();
        self
    }

    pub fn with_feed_token(mut self, token: Option<String>) -> Self {
        self.feed_token = token;
        self
    }

    pub fn with_cache(mut self, cache: TransientCache) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl Provider for WordPressProvider {
    fn name(&self) -> &'static str {
        "wordpress"
    }

    fn create_inventory(&self) -> Option<Box<dyn Inventory>> {
        Some(Box::new(WordPressInventory::new(self.plugins_dir.clone())))
    }

    fn create_directory(&self) -> Option<Box<dyn PluginDirectory>> {
        Some(Box::new(
            WordPressOrgClient::new().with_base_url(self.api_base.clone()),
        ))
    }

    fn create_vulnerability_feed(&self) -> Option<Box<dyn VulnerabilityFeed>> {
        let feed = WpScanFeed::new(self.feed_token.clone()).with_base_url(self.feed_base.clone());
        if !feed.is_enabled() {
            tracing::info!("No vulnerability feed token configured, skipping vulnerability lookups");
            return None;
        }

        Some(Box::new(match &self.cache {
            Some(cache) => feed.with_cache(cache.clone()),
            None => feed,
        }))
    }
}
