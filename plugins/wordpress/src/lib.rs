//! WordPress data sources for the watchdog: installed plugins from disk,
//! release data from WordPress.org and vulnerabilities from WPScan.

pub mod detector;
pub mod feed;
pub mod parser;
pub mod plugin;
pub mod registry;

pub use detector::WordPressInventory;
pub use feed::WpScanFeed;
pub use plugin::WordPressProvider;
pub use registry::WordPressOrgClient;
