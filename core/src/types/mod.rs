pub mod installed;
pub mod risk;

pub use installed::{slug_from_plugin_file, InstalledPlugin};
pub use risk::{Risk, RiskDetails, Severity, VulnerabilityRecord};
