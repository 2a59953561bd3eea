mod history;
mod ignore;
mod notifications;
mod settings;

pub use history::History;
pub use ignore::Ignore;
pub use notifications::Notifications;
pub use settings::{print_schema as settings_schema, SettingsCommand};

use crate::app::App;
use crate::display;
use clap::{ArgAction, Parser};
use watchdog_core::ScanContext;

#[derive(Parser)]
pub struct Scan {
    #[arg(long, default_value_t = true, action = ArgAction::Set, help = "Send notifications for new risks")]
    notify: bool,
    #[arg(short, long, help = "Output in JSON format")]
    json: bool,
}

impl Scan {
    pub async fn run(&self, app: &App) -> anyhow::Result<()> {
        let report = app
            .watchdog
            .run_scan(self.notify, ScanContext::Manual)
            .await?;

        if self.json {
            display::print_json(&report)?;
        } else {
            display::print_report(&report);
        }

        Ok(())
    }
}

#[derive(Parser)]
pub struct Schedule {
    #[arg(short, long, help = "Output in JSON format")]
    json: bool,
}

impl Schedule {
    pub fn run(&self, app: &App) -> anyhow::Result<()> {
        let evaluation = app.watchdog.evaluate_schedule()?;
        let notices = app.watchdog.admin_notices()?;

        if self.json {
            display::print_json(&serde_json::json!({
                "evaluation": evaluation,
                "events": app.host.all_events()?,
                "notices": notices,
            }))?;
        } else {
            display::print_evaluation(&evaluation, &app.host.all_events()?);
            display::print_notices(&notices);
        }

        Ok(())
    }
}

#[derive(Parser)]
pub struct Tick {
    #[arg(short, long, help = "Output in JSON format")]
    json: bool,
}

impl Tick {
    pub async fn run(&self, app: &App) -> anyhow::Result<()> {
        app.watchdog.evaluate_schedule()?;
        let outcomes = app.watchdog.run_due_events().await?;

        if self.json {
            display::print_json(&outcomes)?;
        } else {
            display::print_events(&outcomes);
        }

        Ok(())
    }
}

#[derive(Parser)]
pub struct Serve {
    #[arg(long, help = "Address to listen on (overrides HOST)")]
    host: Option<String>,
    #[arg(long, help = "Port to listen on (overrides PORT)")]
    port: Option<u16>,
}

impl Serve {
    pub async fn run(self, mut app: App) -> anyhow::Result<()> {
        if let Some(host) = self.host {
            app.config.host = host;
        }
        if let Some(port) = self.port {
            app.config.port = port;
        }
        crate::server::serve(app).await
    }
}
