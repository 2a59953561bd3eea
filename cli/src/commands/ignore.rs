use crate::app::App;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum Ignore {
    #[command(about = "Stop reporting a plugin")]
    Add { slug: String },

    #[command(about = "Report a plugin again")]
    Remove { slug: String },

    #[command(about = "List ignored plugins")]
    List,
}

impl Ignore {
    pub fn run(&self, app: &App) -> anyhow::Result<()> {
        let risks = app.watchdog.risks();

        match self {
            Ignore::Add { slug } => {
                if risks.add_ignore(slug)? {
                    println!("Ignoring {}.", slug);
                } else {
                    println!("{} is already ignored.", slug);
                }
            }
            Ignore::Remove { slug } => {
                if risks.remove_ignore(slug)? {
                    println!("No longer ignoring {}.", slug);
                } else {
                    println!("{} was not ignored.", slug);
                }
            }
            Ignore::List => {
                let ignored = risks.ignored()?;
                if ignored.is_empty() {
                    println!("No plugins are ignored.");
                }
                for slug in ignored {
                    println!("{}", slug);
                }
            }
        }

        Ok(())
    }
}
