use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "WATCHDOG_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "watchdog.yaml";

/// Process configuration. Runtime settings (frequency, channels, ...) live
/// in the option store instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON file holding every option.
    pub store: PathBuf,
    pub plugins_dir: PathBuf,
    pub site_name: String,
    pub site_url: String,
    pub admin_email: Option<String>,
    /// Base URL the cron endpoint is reachable at, used to ping it.
    pub public_url: Option<String>,
    pub wpscan_token: Option<String>,
    pub disable_cron: bool,
    /// UTC offset scan times are expressed in, e.g. `+02:00`.
    pub utc_offset: String,
    pub host: String,
    pub port: u16,
    pub sendmail: String,
    pub api_base: Option<String>,
    pub feed_base: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: PathBuf::from("watchdog-store.json"),
            plugins_dir: PathBuf::from("wp-content/plugins"),
            site_name: "WordPress".to_string(),
            site_url: "http://localhost".to_string(),
            admin_email: None,
            public_url: None,
            wpscan_token: None,
            disable_cron: false,
            utc_offset: "+00:00".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            sendmail: "sendmail".to_string(),
            api_base: None,
            feed_base: None,
        }
    }
}

impl Config {
    /// Reads the YAML file (a missing file means defaults), then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            Config::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("WATCHDOG_STORE") {
            self.store = PathBuf::from(v);
        }
        if let Some(v) = var("WATCHDOG_PLUGINS_DIR") {
            self.plugins_dir = PathBuf::from(v);
        }
        if let Some(v) = var("WATCHDOG_SITE_NAME") {
            self.site_name = v;
        }
        if let Some(v) = var("WATCHDOG_SITE_URL") {
            self.site_url = v;
        }
        if let Some(v) = var("WATCHDOG_ADMIN_EMAIL") {
            self.admin_email = Some(v);
        }
        if let Some(v) = var("WATCHDOG_PUBLIC_URL") {
            self.public_url = Some(v);
        }
        if let Some(v) = var("WPSCAN_API_TOKEN") {
            self.wpscan_token = Some(v);
        }
        if let Some(v) = var("WATCHDOG_DISABLE_CRON") {
            self.disable_cron = matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = var("WATCHDOG_UTC_OFFSET") {
            self.utc_offset = v;
        }
        if let Some(v) = var("HOST") {
            self.host = v;
        }
        if let Some(v) = var("PORT") {
            self.port = v
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{}'", v))?;
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }

    /// Public URL of the REST cron endpoint, if one is configured.
    pub fn cron_url(&self) -> Option<String> {
        self.public_url
            .as_ref()
            .map(|base| format!("{}/watchdog/v1/cron", base.trim_end_matches('/')))
    }
}

/// Parses `+HH:MM`, `-HH:MM`, `+HH` or `Z`.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(FixedOffset::east_opt(0).context("zero offset")?);
    }

    let (sign, rest) = if let Some(rest) = value.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = value.strip_prefix('-') {
        (-1, rest)
    } else {
        bail!("UTC offset '{}' must start with + or -", value);
    };

    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours
        .parse()
        .with_context(|| format!("Invalid hours in UTC offset '{}'", value))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("Invalid minutes in UTC offset '{}'", value))?;
    if hours > 14 || minutes > 59 {
        bail!("UTC offset '{}' is out of range", value);
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .with_context(|| format!("UTC offset '{}' is out of range", value))
}
