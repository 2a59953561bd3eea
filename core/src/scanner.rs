//! Builds the risk list for the installed plugins.
//!
//! Every check that applies to a plugin adds a reason to the same [`Risk`];
//! plugins without reasons are left out. Failures fetching directory or
//! vulnerability data only drop that data point.

use crate::error::{Result, WatchdogError};
use crate::report::ScanReport;
use crate::source::SourceRegistry;
use crate::types::{InstalledPlugin, Risk, RiskDetails, VulnerabilityRecord};
use crate::version::VersionComparator;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Instant;

const SECURITY_KEYWORDS: [&str; 2] = ["security", "vulnerability"];

fn markup_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid markup pattern"))
}

/// Whether a changelog entry talks about a security fix. Markup is stripped
/// and matching ignores case.
pub fn changelog_mentions_security(changelog: &str) -> bool {
    let text = markup_pattern().replace_all(changelog, " ").to_lowercase();
    SECURITY_KEYWORDS.iter().any(|keyword| text.contains(keyword))
}

pub struct Scanner<'a> {
    sources: &'a SourceRegistry,
}

impl<'a> Scanner<'a> {
    pub fn new(sources: &'a SourceRegistry) -> Self {
        Self { sources }
    }

    pub async fn scan(&self, run_at: i64, ignored: &[String]) -> Result<ScanReport> {
        let start = Instant::now();
        let mut report = ScanReport::new(run_at);

        let inventory = self.sources.inventory().ok_or_else(|| WatchdogError::Config {
            message: "No plugin inventory registered".to_string(),
        })?;

        let plugins = inventory.installed().await?;
        tracing::info!(count = plugins.len(), "Scanning installed plugins");

        for plugin in plugins {
            let slug = plugin.slug();
            if ignored.iter().any(|s| *s == slug) {
                tracing::debug!(slug = %slug, "Skipping ignored plugin");
                report.plugins_ignored += 1;
                continue;
            }

            report.plugins_scanned += 1;
            if let Some(risk) = self.check_plugin(&plugin, &slug, &mut report.warnings).await {
                tracing::info!(slug = %slug, reasons = risk.reasons.len(), "Plugin at risk");
                report.add_risk(risk);
            }
        }

        report.elapsed = start.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn check_plugin(
        &self,
        plugin: &InstalledPlugin,
        slug: &str,
        warnings: &mut Vec<String>,
    ) -> Option<Risk> {
        let local = plugin.version.trim();
        let mut reasons = Vec::new();
        let mut remote_version = None;

        if let Some(directory) = self.sources.directory() {
            match directory.lookup(slug).await {
                Ok(Some(remote)) => {
                    let remote_trimmed = remote.version.trim();

                    if VersionComparator::is_newer(local, remote_trimmed) {
                        reasons.push(format!("Update available: {} -> {}", local, remote_trimmed));
                    }

                    if let Some(gap) = VersionComparator::minor_versions_behind(local, remote_trimmed) {
                        if gap >= 2 {
                            reasons.push(format!("{} minor versions behind the latest release", gap));
                        }
                    }

                    if remote
                        .changelog
                        .as_deref()
                        .is_some_and(changelog_mentions_security)
                    {
                        reasons.push("Latest changelog mentions security fixes".to_string());
                    }

                    remote_version = Some(remote_trimmed.to_string());
                }
                Ok(None) => {
                    tracing::debug!(slug = %slug, "Plugin is not listed in the directory");
                }
                Err(e) => {
                    tracing::warn!(slug = %slug, error = %e, "Directory lookup failed");
                    warnings.push(format!("{}: {}", slug, e));
                }
            }
        }

        let mut vulnerabilities: Vec<VulnerabilityRecord> = Vec::new();
        if let Some(feed) = self.sources.vulnerability_feed() {
            match feed.active_vulnerabilities(slug, local).await {
                Ok(found) => vulnerabilities = found,
                Err(e) => {
                    tracing::warn!(slug = %slug, error = %e, "Vulnerability lookup failed");
                    warnings.push(format!("{}: {}", slug, e));
                }
            }
        }

        match vulnerabilities.len() {
            0 => {}
            1 => reasons.push("1 known vulnerability reported".to_string()),
            n => reasons.push(format!("{} known vulnerabilities reported", n)),
        }

        if reasons.is_empty() {
            return None;
        }

        Some(Risk {
            plugin_slug: slug.to_string(),
            plugin_name: plugin.name.clone(),
            local_version: local.to_string(),
            remote_version,
            reasons,
            details: RiskDetails { vulnerabilities },
        })
    }
}
