use crate::app::App;
use crate::display;
use anyhow::Context;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Notifications {
    #[command(about = "Notify about the stored risks without scanning")]
    Send {
        #[arg(long, help = "Send even if the risks did not change")]
        force: bool,
    },

    #[command(about = "Deliver queued notifications that are due")]
    Flush,

    #[command(about = "List queued notifications")]
    List {
        #[arg(short, long, help = "Output in JSON format")]
        json: bool,
    },

    #[command(about = "Put the last failed notification back in the queue")]
    Requeue,

    #[command(about = "Show or export the last failed notification")]
    DeadLetter {
        #[arg(short, long, help = "Write the record to this file")]
        output: Option<PathBuf>,
    },
}

impl Notifications {
    pub async fn run(&self, app: &App) -> anyhow::Result<()> {
        let watchdog = &app.watchdog;

        match self {
            Notifications::Send { force } => {
                let decision = watchdog.send_notifications(*force, true).await?;
                display::print_decision(&decision);
            }
            Notifications::Flush => {
                let stats = watchdog.flush_notification_queue().await?;
                display::print_stats(&stats);
            }
            Notifications::List { json } => {
                let jobs = watchdog.queue().jobs()?;
                if *json {
                    display::print_json(&jobs)?;
                } else {
                    display::print_jobs(&jobs);
                }
            }
            Notifications::Requeue => {
                if watchdog.requeue_dead_letter()? {
                    println!("Failed notification requeued.");
                } else {
                    println!("There is no failed notification to requeue.");
                }
            }
            Notifications::DeadLetter { output } => {
                let Some(exported) = watchdog.export_dead_letter()? else {
                    println!("There is no failed notification.");
                    return Ok(());
                };

                match output {
                    Some(path) => {
                        std::fs::write(path, exported)
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        println!("Failed notification written to {}", path.display());
                    }
                    None => {
                        if let Some(failed) = watchdog.queue().last_failed()? {
                            display::print_dead_letter(&failed);
                        }
                        println!();
                        println!("{}", exported);
                    }
                }
            }
        }

        Ok(())
    }
}
