use crate::parser::{header_window, parse_plugin_headers, HEADER_READ_LIMIT};
use async_trait::async_trait;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use watchdog_core::source::Inventory;
use watchdog_core::{InstalledPlugin, Result, WatchdogError};

/// Reads installed plugins from a `wp-content/plugins` directory the same
/// way WordPress does: PHP files at the top level, or one level down in a
/// plugin folder.
pub struct WordPressInventory {
    plugins_dir: PathBuf,
}

impl WordPressInventory {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    fn read_header_window(path: &Path) -> std::io::Result<String> {
        let mut buffer = Vec::with_capacity(HEADER_READ_LIMIT);
        std::fs::File::open(path)?
            .take(HEADER_READ_LIMIT as u64)
            .read_to_end(&mut buffer)?;
        Ok(header_window(&buffer))
    }

    fn detect(&self) -> Result<Vec<InstalledPlugin>> {
        if !self.plugins_dir.is_dir() {
            return Err(WatchdogError::Config {
                message: format!(
                    "Plugins directory '{}' does not exist",
                    self.plugins_dir.display()
                ),
            });
        }

        let walker = WalkDir::new(&self.plugins_dir)
            .min_depth(1)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));

        let mut plugins: Vec<InstalledPlugin> = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("php")
            {
                continue;
            }

            let Ok(relative) = path.strip_prefix(&self.plugins_dir) else {
                continue;
            };
            let file = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            // One main file per plugin folder.
            if entry.depth() == 2 {
                let folder = file.split('/').next().unwrap_or_default();
                if plugins.iter().any(|p| p.file.starts_with(&format!("{}/", folder))) {
                    continue;
                }
            }

            let content = match Self::read_header_window(path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read plugin file");
                    continue;
                }
            };

            if let Some(headers) = parse_plugin_headers(&content) {
                plugins.push(InstalledPlugin::new(file, headers.name, headers.version));
            }
        }

        plugins.sort_by(|a, b| a.file.cmp(&b.file));
        tracing::debug!(dir = %self.plugins_dir.display(), count = plugins.len(), "Detected installed plugins");
        Ok(plugins)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[async_trait]
impl Inventory for WordPressInventory {
    async fn installed(&self) -> Result<Vec<InstalledPlugin>> {
        self.detect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn header(name: &str, version: &str) -> String {
        format!("<?php\n/**\n * Plugin Name: {}\n * Version: {}\n */\n", name, version)
    }

    #[tokio::test]
    async fn test_detects_folder_and_single_file_plugins() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        fs::create_dir(root.join("akismet")).unwrap();
        fs::write(root.join("akismet/akismet.php"), header("Akismet", "5.3")).unwrap();
        fs::write(root.join("akismet/class.akismet.php"), "<?php\nclass Akismet {}\n").unwrap();
        fs::write(root.join("hello.php"), header("Hello Dolly", "1.7.2")).unwrap();
        fs::write(root.join("index.php"), "<?php\n// Silence is golden.\n").unwrap();
        fs::write(root.join("readme.txt"), "Plugin Name: Not a plugin").unwrap();

        let plugins = WordPressInventory::new(root).installed().await.unwrap();

        assert_eq!(
            plugins,
            vec![
                InstalledPlugin::new("akismet/akismet.php", "Akismet", "5.3"),
                InstalledPlugin::new("hello.php", "Hello Dolly", "1.7.2"),
            ]
        );
        assert_eq!(plugins[0].slug(), "akismet");
        assert_eq!(plugins[1].slug(), "hello");
    }

    #[tokio::test]
    async fn test_first_header_file_in_folder_wins() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        fs::create_dir(root.join("forms")).unwrap();
        fs::write(root.join("forms/a-helper.php"), "<?php\n").unwrap();
        fs::write(root.join("forms/b-main.php"), header("Forms", "2.0")).unwrap();
        fs::write(root.join("forms/c-legacy.php"), header("Forms Legacy", "1.0")).unwrap();

        let plugins = WordPressInventory::new(root).installed().await.unwrap();
        assert_eq!(plugins, vec![InstalledPlugin::new("forms/b-main.php", "Forms", "2.0")]);
    }

    #[tokio::test]
    async fn test_ignores_deeper_files() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("suite/includes")).unwrap();
        fs::write(root.join("suite/includes/module.php"), header("Module", "1.0")).unwrap();

        let plugins = WordPressInventory::new(root).installed().await.unwrap();
        assert!(plugins.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let result = WordPressInventory::new(dir.path().join("missing")).installed().await;
        assert!(matches!(result, Err(WatchdogError::Config { .. })));
    }
}
