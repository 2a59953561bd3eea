use crate::app::App;
use crate::display;
use anyhow::bail;
use clap::{Subcommand, ValueEnum};

#[derive(Clone, Copy, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
pub enum History {
    #[command(about = "List stored scan snapshots, newest first")]
    List {
        #[arg(short, long, help = "Output in JSON format")]
        json: bool,
    },

    #[command(about = "Export one scan snapshot")]
    Export {
        #[arg(long, help = "Timestamp of the scan to export")]
        run_at: i64,
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,
    },
}

impl History {
    pub fn run(&self, app: &App) -> anyhow::Result<()> {
        let history = app.watchdog.history();

        match self {
            History::List { json } => {
                let records = history.list()?;
                if *json {
                    display::print_json(&records)?;
                } else {
                    display::print_history(&records);
                }
            }
            History::Export { run_at, format } => {
                let Some(record) = history.find(*run_at)? else {
                    bail!("No scan found for run_at {}", run_at);
                };
                match format {
                    ExportFormat::Json => println!("{}", record.to_json()?),
                    ExportFormat::Csv => print!("{}", record.to_csv()),
                }
            }
        }

        Ok(())
    }
}
