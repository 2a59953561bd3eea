use crate::types::{Risk, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub run_at: i64,

    /// Wall time of the scan in milliseconds.
    pub elapsed: u64,

    pub plugins_scanned: usize,

    pub plugins_ignored: usize,

    pub summary: ScanSummary,

    pub risks: Vec<Risk>,

    /// Data points that could not be fetched. The scan still completes.
    pub warnings: Vec<String>,

    pub notified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub plugins_at_risk: usize,
    pub updates_available: usize,
    pub vulnerabilities_found: usize,
    pub severe_vulnerabilities: usize,
    pub high_vulnerabilities: usize,
    pub medium_vulnerabilities: usize,
    pub low_vulnerabilities: usize,
}

impl ScanReport {
    pub fn new(run_at: i64) -> Self {
        Self {
            run_at,
            elapsed: 0,
            plugins_scanned: 0,
            plugins_ignored: 0,
            summary: ScanSummary::default(),
            risks: Vec::new(),
            warnings: Vec::new(),
            notified: false,
        }
    }

    pub fn add_risk(&mut self, risk: Risk) {
        self.summary.plugins_at_risk += 1;

        if risk.remote_version.is_some() && risk.reasons.iter().any(|r| r.starts_with("Update available")) {
            self.summary.updates_available += 1;
        }

        for vuln in &risk.details.vulnerabilities {
            self.summary.vulnerabilities_found += 1;
            match vuln.severity {
                Some(Severity::Low) => self.summary.low_vulnerabilities += 1,
                Some(Severity::Medium) => self.summary.medium_vulnerabilities += 1,
                Some(Severity::High) => self.summary.high_vulnerabilities += 1,
                Some(Severity::Severe) => self.summary.severe_vulnerabilities += 1,
                None => {}
            }
        }

        self.risks.push(risk);
    }

    pub fn has_risks(&self) -> bool {
        !self.risks.is_empty()
    }

    pub fn has_severe_vulnerabilities(&self) -> bool {
        self.summary.severe_vulnerabilities > 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskDetails, VulnerabilityRecord};

    #[test]
    fn test_summary_counts() {
        let mut report = ScanReport::new(1);
        report.add_risk(Risk {
            plugin_slug: "a".to_string(),
            plugin_name: "A".to_string(),
            local_version: "1.0".to_string(),
            remote_version: Some("1.1".to_string()),
            reasons: vec!["Update available: 1.0 -> 1.1".to_string()],
            details: RiskDetails {
                vulnerabilities: vec![
                    VulnerabilityRecord::new("x", vec![], None, None, Some(9.5)),
                    VulnerabilityRecord::new("y", vec![], None, None, Some(2.0)),
                    VulnerabilityRecord::new("z", vec![], None, None, None),
                ],
            },
        });

        assert!(report.has_risks());
        assert!(report.has_severe_vulnerabilities());
        assert_eq!(report.summary.plugins_at_risk, 1);
        assert_eq!(report.summary.updates_available, 1);
        assert_eq!(report.summary.vulnerabilities_found, 3);
        assert_eq!(report.summary.low_vulnerabilities, 1);
        assert_eq!(report.summary.severe_vulnerabilities, 1);
    }
}
