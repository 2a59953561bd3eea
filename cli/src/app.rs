use crate::config::Config;
use crate::mailer::SendmailMailer;
use anyhow::Result;
use std::sync::Arc;
use watchdog_core::notifier::SiteInfo;
use watchdog_core::{
    DeliverySender, HttpClient, JsonFileStore, Mailer, OptionStore, SourceRegistry, StoredCronHost,
    SystemClock, Watchdog,
};

#[cfg(feature = "wordpress")]
use watchdog_core::TransientCache;
#[cfg(feature = "wordpress")]
use watchdog_plugin_wordpress::WordPressProvider;

/// Everything a command needs, wired from the process configuration.
pub struct App {
    pub config: Config,
    pub host: Arc<StoredCronHost>,
    pub watchdog: Watchdog,
}

impl App {
    pub fn build(config: Config) -> Result<Self> {
        let store = OptionStore::new(Arc::new(JsonFileStore::new(config.store.clone())));
        let clock = Arc::new(SystemClock);

        let mut sources = SourceRegistry::new();

        #[cfg(feature = "wordpress")]
        {
            let mut provider = WordPressProvider::new(config.plugins_dir.clone())
                .with_feed_token(config.wpscan_token.clone())
                .with_cache(TransientCache::new(store.clone(), clock.clone()));
            if let Some(base) = &config.api_base {
                provider = provider.with_api_base(base.clone());
            }
            if let Some(base) = &config.feed_base {
                provider = provider.with_feed_base(base.clone());
            }
            sources.register_provider(&provider);
        }

        let host = Arc::new(
            StoredCronHost::new(store.clone(), clock.clone())
                .with_disabled(config.disable_cron)
                .with_ping_url(config.cron_url()),
        );

        let from = config
            .admin_email
            .clone()
            .unwrap_or_else(|| "watchdog@localhost".to_string());
        let mailer: Arc<dyn Mailer> = Arc::new(SendmailMailer::new(
            config.sendmail.clone(),
            format!("{} <{}>", config.site_name, from),
        ));
        let sender = Arc::new(DeliverySender::new(HttpClient::new().with_retries(0), Some(mailer)));

        let site = SiteInfo {
            name: config.site_name.clone(),
            url: config.site_url.clone(),
            admin_email: config.admin_email.clone(),
        };

        let watchdog = Watchdog::new(store, clock, sources, host.clone(), sender, site)
            .with_timezone(config.timezone()?);

        Ok(Self {
            config,
            host,
            watchdog,
        })
    }
}
