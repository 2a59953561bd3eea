use crate::app::App;
use crate::display;
use clap::{ArgAction, Args, Subcommand};
use colored::Colorize;
use watchdog_core::settings::{ChatSettings, Weekday};
use watchdog_core::{Frequency, Settings};

#[derive(Subcommand)]
pub enum SettingsCommand {
    #[command(about = "Print the stored settings")]
    Show {
        #[arg(short, long, help = "Output in JSON format instead of YAML")]
        json: bool,
    },

    #[command(about = "Print the JSON schema of the settings")]
    Schema,

    #[command(about = "Change settings and re-evaluate the schedule")]
    Set(SetArgs),

    #[command(about = "Generate a new cron endpoint key")]
    RegenerateSecret,
}

#[derive(Args)]
pub struct SetArgs {
    #[arg(long)]
    frequency: Option<Frequency>,
    #[arg(long, help = "Daily scan time, HH:MM")]
    daily_time: Option<String>,
    #[arg(long)]
    weekly_day: Option<Weekday>,
    #[arg(long, help = "Weekly scan time, HH:MM")]
    weekly_time: Option<String>,
    #[arg(long, help = "Scan snapshots to keep (1-15)")]
    retention: Option<u8>,
    #[arg(long, action = ArgAction::Set)]
    email_enabled: Option<bool>,
    #[arg(long, value_delimiter = ',', help = "Comma separated recipients")]
    email_recipients: Option<Vec<String>>,
    #[arg(long, action = ArgAction::Set)]
    webhook_enabled: Option<bool>,
    #[arg(long)]
    webhook_url: Option<String>,
    #[arg(long)]
    webhook_secret: Option<String>,
    #[arg(long, help = "Discord webhook URL, empty to disable")]
    discord_url: Option<String>,
    #[arg(long, help = "Slack webhook URL, empty to disable")]
    slack_url: Option<String>,
    #[arg(long, help = "Microsoft Teams webhook URL, empty to disable")]
    teams_url: Option<String>,
}

fn set_chat(chat: &mut ChatSettings, url: &Option<String>) {
    if let Some(url) = url {
        chat.webhook_url = url.trim().to_string();
        chat.enabled = !chat.webhook_url.is_empty();
    }
}

impl SetArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(frequency) = self.frequency {
            settings.frequency = frequency;
        }
        if let Some(time) = &self.daily_time {
            settings.daily_time = time.clone();
        }
        if let Some(day) = self.weekly_day {
            settings.weekly_day = day;
        }
        if let Some(time) = &self.weekly_time {
            settings.weekly_time = time.clone();
        }
        if let Some(retention) = self.retention {
            settings.history_retention = retention;
        }

        let notifications = &mut settings.notifications;
        if let Some(enabled) = self.email_enabled {
            notifications.email.enabled = enabled;
        }
        if let Some(recipients) = &self.email_recipients {
            notifications.email.recipients = recipients.clone();
        }
        if let Some(enabled) = self.webhook_enabled {
            notifications.webhook.enabled = enabled;
        }
        if let Some(url) = &self.webhook_url {
            notifications.webhook.url = url.clone();
        }
        if let Some(secret) = &self.webhook_secret {
            notifications.webhook.secret = Some(secret.clone());
        }
        set_chat(&mut notifications.discord, &self.discord_url);
        set_chat(&mut notifications.slack, &self.slack_url);
        set_chat(&mut notifications.teams, &self.teams_url);
    }
}

impl SettingsCommand {
    pub fn run(&self, app: &App) -> anyhow::Result<()> {
        match self {
            SettingsCommand::Show { json } => {
                let settings = app.watchdog.settings().load()?;
                if *json {
                    display::print_json(&settings)?;
                } else {
                    print!("{}", serde_yaml::to_string(&settings)?);
                }
            }
            SettingsCommand::Schema => print_schema()?,
            SettingsCommand::Set(args) => {
                let mut settings = app.watchdog.settings().load()?;
                args.apply(&mut settings);

                let outcome = app.watchdog.save_settings(settings)?;
                for notice in &outcome.notices {
                    println!("{} {}", "notice:".yellow(), notice);
                }
                println!("Settings saved.");

                let evaluation = app.watchdog.evaluate_schedule()?;
                display::print_evaluation(&evaluation, &app.host.all_events()?);
            }
            SettingsCommand::RegenerateSecret => {
                let secret = app.watchdog.settings().regenerate_secret()?;
                println!("{}", secret);
            }
        }

        Ok(())
    }
}

pub fn print_schema() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(Settings);
    display::print_json(&schema)
}
