use crate::error::Result;
use crate::store::{keys, OptionStore};
use crate::types::Risk;
use sha2::{Digest, Sha256};

/// Current risk list, ignore list and the last notified content hash.
#[derive(Debug, Clone)]
pub struct RiskRepository {
    store: OptionStore,
}

impl RiskRepository {
    pub fn new(store: OptionStore) -> Self {
        Self { store }
    }

    pub fn current(&self) -> Result<Vec<Risk>> {
        self.store.get_or_default(keys::RISKS)
    }

    pub fn save_current(&self, risks: &[Risk]) -> Result<()> {
        self.store.set(keys::RISKS, risks)
    }

    pub fn ignored(&self) -> Result<Vec<String>> {
        self.store.get_or_default(keys::IGNORED)
    }

    /// Returns `false` when the slug was already ignored or is blank.
    pub fn add_ignore(&self, slug: &str) -> Result<bool> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Ok(false);
        }

        let mut ignored = self.ignored()?;
        if ignored.iter().any(|s| s == slug) {
            return Ok(false);
        }

        ignored.push(slug.to_string());
        ignored.sort();
        self.store.set(keys::IGNORED, &ignored)?;
        Ok(true)
    }

    pub fn remove_ignore(&self, slug: &str) -> Result<bool> {
        let mut ignored = self.ignored()?;
        let before = ignored.len();
        ignored.retain(|s| s != slug.trim());

        if ignored.len() == before {
            return Ok(false);
        }

        self.store.set(keys::IGNORED, &ignored)?;
        Ok(true)
    }

    pub fn last_notification_hash(&self) -> Result<Option<String>> {
        self.store.get(keys::LAST_NOTIFICATION)
    }

    pub fn set_last_notification_hash(&self, hash: &str) -> Result<()> {
        self.store.set(keys::LAST_NOTIFICATION, hash)
    }
}

/// Content hash of a risk set, independent of scan order.
pub fn risk_hash(risks: &[Risk]) -> String {
    let mut ordered: Vec<&Risk> = risks.iter().collect();
    ordered.sort_by(|a, b| a.plugin_slug.cmp(&b.plugin_slug));

    let encoded = serde_json::to_vec(&ordered).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}
