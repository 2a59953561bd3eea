//! WP Watchdog Core Library
//!
//! Scanning, notification delivery and scheduling for the plugin watchdog.
//! Data sources plug in through the traits in [`source`].

pub mod cache;
pub mod clock;
pub mod error;
pub mod history;
pub mod http;
pub mod notifier;
pub mod queue;
pub mod report;
pub mod risks;
pub mod scanner;
pub mod scheduler;
pub mod settings;
pub mod source;
pub mod store;
pub mod types;
pub mod version;
pub mod watchdog;

pub use types::*;
pub use error::{WatchdogError, Result};
pub use source::{Inventory, PluginDirectory, Provider, RemotePlugin, SourceRegistry, VulnerabilityFeed};
pub use report::{ScanReport, ScanSummary};
pub use scanner::Scanner;
pub use http::HttpClient;
pub use cache::{CacheEntry, TransientCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, OptionStore};
pub use settings::{Frequency, Settings, SettingsRepository};
pub use queue::{Channel, Job, JobRequest, JobSender, NotificationQueue, ProcessStats};
pub use notifier::{DeliverySender, Mailer, Notifier, SiteInfo};
pub use scheduler::{CronHealth, CronHost, CronScheduler, CronStatus, StoredCronHost};
pub use version::VersionComparator;
pub use watchdog::{CronResponse, NotificationDecision, ScanContext, Watchdog};
