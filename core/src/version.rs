use regex::Regex;
use semver::Version;
use std::cmp::Ordering;
use std::sync::OnceLock;

fn standard_version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+(\.\d+){0,2}$").expect("valid version pattern"))
}

/// Version checks used to decide whether a plugin is outdated.
///
/// Only "standard" versions (one to three numeric components) are compared.
/// Plugins versioned by date, hash or anything else never produce an
/// outdated signal.
pub struct VersionComparator;

impl VersionComparator {
    pub fn is_standard_version(version: &str) -> bool {
        standard_version_pattern().is_match(version.trim())
    }

    /// Number of minor releases `local` trails `remote`, or `None` when the
    /// versions are not comparable (non-standard, or different majors).
    pub fn minor_versions_behind(local: &str, remote: &str) -> Option<u64> {
        let local = Self::parse_version(local)?;
        let remote = Self::parse_version(remote)?;

        if local.major != remote.major {
            return None;
        }

        Some(remote.minor.saturating_sub(local.minor))
    }

    pub fn is_two_minor_versions_behind(local: &str, remote: &str) -> bool {
        Self::minor_versions_behind(local, remote).is_some_and(|gap| gap >= 2)
    }

    /// Ordering of two standard versions; `None` if either is non-standard.
    pub fn compare(a: &str, b: &str) -> Option<Ordering> {
        let a = Self::parse_version(a)?;
        let b = Self::parse_version(b)?;
        Some(a.cmp(&b))
    }

    pub fn is_newer(local: &str, remote: &str) -> bool {
        Self::compare(remote, local) == Some(Ordering::Greater)
    }

    /// Builds a version from one to three numeric components. Missing
    /// components are zero; leading zeros (`1.02`) are accepted.
    fn parse_version(version: &str) -> Option<Version> {
        let version = version.trim();
        if !Self::is_standard_version(version) {
            return None;
        }

        let mut parts = [0u64; 3];
        for (slot, part) in parts.iter_mut().zip(version.split('.')) {
            *slot = part.parse().ok()?;
        }
        Some(Version::new(parts[0], parts[1], parts[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_versions() {
        assert!(VersionComparator::is_standard_version("1"));
        assert!(VersionComparator::is_standard_version("1.2"));
        assert!(VersionComparator::is_standard_version("1.2.3"));
        assert!(VersionComparator::is_standard_version("10.20.30"));
    }

    #[test]
    fn test_non_standard_versions() {
        assert!(!VersionComparator::is_standard_version("1.2.3.4"));
        assert!(!VersionComparator::is_standard_version("1.2.3-beta"));
        assert!(!VersionComparator::is_standard_version("v1.2"));
        assert!(!VersionComparator::is_standard_version("2024-01-05"));
        assert!(!VersionComparator::is_standard_version("a1b2c3d"));
        assert!(!VersionComparator::is_standard_version(""));
    }

    #[test]
    fn test_minor_versions_behind() {
        assert_eq!(VersionComparator::minor_versions_behind("1.2.0", "1.4.0"), Some(2));
        assert!(VersionComparator::is_two_minor_versions_behind("1.2.0", "1.4.0"));

        assert_eq!(VersionComparator::minor_versions_behind("1.2.0", "1.3.5"), Some(1));
        assert!(!VersionComparator::is_two_minor_versions_behind("1.2.0", "1.3.5"));
    }

    #[test]
    fn test_local_ahead_is_zero_gap() {
        assert_eq!(VersionComparator::minor_versions_behind("1.5", "1.2"), Some(0));
    }

    #[test]
    fn test_major_change_is_not_comparable() {
        assert_eq!(VersionComparator::minor_versions_behind("1.2.0", "2.0.0"), None);
        assert!(!VersionComparator::is_two_minor_versions_behind("1.2.0", "2.9.0"));
    }

    #[test]
    fn test_non_standard_is_not_comparable() {
        for (local, remote) in [
            ("2023.01.01.1", "2024.02.02.1"),
            ("abc123", "def456"),
            ("1.0-beta", "1.5-beta"),
        ] {
            assert_eq!(VersionComparator::minor_versions_behind(local, remote), None);
        }
        assert_eq!(VersionComparator::minor_versions_behind("1.0", "trunk"), None);
    }

    #[test]
    fn test_is_newer_pads_short_versions() {
        assert!(VersionComparator::is_newer("1.2", "1.2.1"));
        assert!(VersionComparator::is_newer("1", "1.0.1"));
        assert!(!VersionComparator::is_newer("1.2.0", "1.2"));
        assert!(!VersionComparator::is_newer("2.0.0", "1.9.9"));
        assert!(!VersionComparator::is_newer("1.0", "1.0-hotfix"));
    }

    #[test]
    fn test_leading_zero_components() {
        assert!(VersionComparator::is_standard_version("1.02"));
        assert_eq!(VersionComparator::minor_versions_behind("1.02", "1.04"), Some(2));
        assert!(VersionComparator::is_newer("1.08", "1.09"));
        assert_eq!(VersionComparator::compare("2.05", "2.5.0"), Some(Ordering::Equal));
    }
}
