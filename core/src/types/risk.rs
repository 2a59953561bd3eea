use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Severe,
}

impl Severity {
    /// Tier for a CVSS-style score. Negative scores carry no tier.
    pub fn from_cvss_score(score: f64) -> Option<Self> {
        if score.is_nan() || score < 0.0 {
            None
        } else if score < 4.0 {
            Some(Severity::Low)
        } else if score < 7.0 {
            Some(Severity::Medium)
        } else if score < 9.0 {
            Some(Severity::High)
        } else {
            Some(Severity::Severe)
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Severe => "severe",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Severe => "Severe",
        }
    }

    /// Badge colour used by the email and chat renderers.
    pub fn color(&self) -> &'static str {
        match self {
            Severity::Low => "#2e7d32",
            Severity::Medium => "#f9a825",
            Severity::High => "#ef6c00",
            Severity::Severe => "#c62828",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    pub title: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub fixed_in: Option<String>,
    #[serde(default)]
    pub cve: Option<String>,
    #[serde(default)]
    pub cvss_score: Option<f64>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub severity_label: Option<String>,
}

impl VulnerabilityRecord {
    pub fn new(
        title: impl Into<String>,
        references: Vec<String>,
        fixed_in: Option<String>,
        cve: Option<String>,
        cvss_score: Option<f64>,
    ) -> Self {
        let severity = cvss_score.and_then(Severity::from_cvss_score);
        Self {
            title: title.into(),
            references,
            fixed_in,
            cve,
            cvss_score,
            severity,
            severity_label: severity.map(|s| s.label().to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskDetails {
    #[serde(default)]
    pub vulnerabilities: Vec<VulnerabilityRecord>,
}

/// One at-risk plugin. All reasons found in a scan are collected in a
/// single value; risks are rebuilt on every scan and never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub plugin_slug: String,
    pub plugin_name: String,
    pub local_version: String,
    pub remote_version: Option<String>,
    pub reasons: Vec<String>,
    #[serde(default)]
    pub details: RiskDetails,
}

impl Risk {
    pub fn highest_severity(&self) -> Option<Severity> {
        self.details
            .vulnerabilities
            .iter()
            .filter_map(|v| v.severity)
            .max()
    }
}
