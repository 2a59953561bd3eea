use serde::{Deserialize, Serialize};
use std::path::Path;

/// A plugin as found on the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPlugin {
    /// Path relative to the plugins directory, e.g. `akismet/akismet.php`.
    pub file: String,
    pub name: String,
    pub version: String,
}

impl InstalledPlugin {
    pub fn new(file: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn slug(&self) -> String {
        slug_from_plugin_file(&self.file)
    }
}

/// Directory name for plugins living in their own folder, file stem for
/// single-file plugins dropped straight into the plugins directory.
pub fn slug_from_plugin_file(file: &str) -> String {
    let normalized = file.replace('\\', "/");
    let trimmed = normalized.trim_matches('/');

    match trimmed.split_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir.to_string(),
        _ => Path::new(trimmed)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| trimmed.to_string()),
    }
}
