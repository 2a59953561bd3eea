use crate::error::Result;
use crate::types::{InstalledPlugin, VulnerabilityRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the public plugin directory knows about a slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePlugin {
    pub version: String,
    /// Changelog entry for `version`, as HTML.
    pub changelog: Option<String>,
}

#[async_trait]
pub trait Inventory: Send + Sync {
    async fn installed(&self) -> Result<Vec<InstalledPlugin>>;
}

#[async_trait]
pub trait PluginDirectory: Send + Sync {
    /// `Ok(None)` when the slug is not listed in the directory.
    async fn lookup(&self, slug: &str) -> Result<Option<RemotePlugin>>;
}

#[async_trait]
pub trait VulnerabilityFeed: Send + Sync {
    /// Vulnerabilities still affecting `version` of `slug`.
    async fn active_vulnerabilities(
        &self,
        slug: &str,
        version: &str,
    ) -> Result<Vec<VulnerabilityRecord>>;
}

pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_inventory(&self) -> Option<Box<dyn Inventory>> { None }
    fn create_directory(&self) -> Option<Box<dyn PluginDirectory>> { None }
    fn create_vulnerability_feed(&self) -> Option<Box<dyn VulnerabilityFeed>> { None }
}

/// The data sources a scan draws from. Later registrations replace earlier
/// ones.
#[derive(Default)]
pub struct SourceRegistry {
    inventory: Option<Box<dyn Inventory>>,
    directory: Option<Box<dyn PluginDirectory>>,
    feed: Option<Box<dyn VulnerabilityFeed>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_inventory(&mut self, inventory: Box<dyn Inventory>) {
        self.inventory = Some(inventory);
    }

    pub fn register_directory(&mut self, directory: Box<dyn PluginDirectory>) {
        self.directory = Some(directory);
    }

    pub fn register_vulnerability_feed(&mut self, feed: Box<dyn VulnerabilityFeed>) {
        self.feed = Some(feed);
    }

    pub fn register_provider<P: Provider + ?Sized>(&mut self, provider: &P) {
        tracing::debug!(provider = provider.name(), "Registering data sources");

        if let Some(inventory) = provider.create_inventory() {
            self.register_inventory(inventory);
        }
        if let Some(directory) = provider.create_directory() {
            self.register_directory(directory);
        }
        if let Some(feed) = provider.create_vulnerability_feed() {
            self.register_vulnerability_feed(feed);
        }
    }

    pub fn inventory(&self) -> Option<&dyn Inventory> {
        self.inventory.as_deref()
    }

    pub fn directory(&self) -> Option<&dyn PluginDirectory> {
        self.directory.as_deref()
    }

    pub fn vulnerability_feed(&self) -> Option<&dyn VulnerabilityFeed> {
        self.feed.as_deref()
    }
}
