mod app;
mod commands;
mod config;
mod display;
mod mailer;
mod server;

use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const PING_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "watchdog")]
#[command(about = "Watches WordPress plugins for updates and known vulnerabilities", long_about = None)]
struct Cli {
    #[arg(short, long, global = true, help = "Path to the YAML configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
enum Commands {
    #[command(about = "Scan installed plugins now")]
    Scan(commands::Scan),

    #[command(subcommand, about = "Send, flush and inspect notifications")]
    Notifications(commands::Notifications),

    #[command(subcommand, about = "Browse and export scan history")]
    History(commands::History),

    #[command(subcommand, about = "Manage the plugin ignore list")]
    Ignore(commands::Ignore),

    #[command(subcommand, about = "Show and change settings")]
    Settings(commands::SettingsCommand),

    #[command(about = "Re-evaluate the scan schedule and show cron health")]
    Schedule(commands::Schedule),

    #[command(about = "Run cron events that are due")]
    Tick(commands::Tick),

    #[command(about = "Serve the REST cron endpoint and run due events every minute")]
    Serve(commands::Serve),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // The schema needs no store.
    if let Commands::Settings(commands::SettingsCommand::Schema) = cli.command {
        return commands::settings_schema();
    }

    let config = config::Config::load(cli.config.as_deref())?;
    let app = app::App::build(config)?;
    let host = app.host.clone();

    let result = match cli.command {
        Commands::Scan(cmd) => cmd.run(&app).await,
        Commands::Notifications(cmd) => cmd.run(&app).await,
        Commands::History(cmd) => cmd.run(&app),
        Commands::Ignore(cmd) => cmd.run(&app),
        Commands::Settings(cmd) => cmd.run(&app),
        Commands::Schedule(cmd) => cmd.run(&app),
        Commands::Tick(cmd) => cmd.run(&app).await,
        Commands::Serve(cmd) => return cmd.run(app).await,
    };

    // Rescheduling may have pinged the cron endpoint in the background.
    host.wait_for_pings(PING_WAIT).await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
