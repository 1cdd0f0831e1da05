mod commands;
mod config;
mod remote;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::commands::{
    AddArgs, EditArgs, cmd_calendar, cmd_login, cmd_logout, cmd_med_add, cmd_med_delete,
    cmd_med_edit, cmd_med_list, cmd_overview, cmd_take, cmd_today, cmd_whoami,
};
use crate::config::Config;
use crate::remote::RestStore;
use medtrack_core::clock::SystemClock;
use medtrack_core::db::SqliteStore;
use medtrack_core::service::MedTracker;
use medtrack_core::store::RemoteStore;

#[derive(Parser)]
#[command(
    name = "medtrack",
    version,
    about = "Track daily medication intake",
    long_about = "Track daily medication intake for a patient, with optional photo proof,\n\
                  adherence metrics and a caretaker overview."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in as a user; later commands act on this user's data
    Login {
        /// User id
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign out and forget the saved session
    Logout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the signed-in user and store settings
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage medications
    Med {
        #[command(subcommand)]
        command: MedCommands,
    },
    /// Mark a medication as taken today
    Take {
        /// Medication id or name
        medication: String,
        /// Photo proof of the dose
        #[arg(long, value_name = "FILE")]
        photo: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Patient dashboard: doses for a day, streak and this month
    Today {
        /// Date to show (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Caretaker overview: adherence, recent activity and a selected day
    Overview {
        /// Date to inspect (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a month of taken / missed days
    Calendar {
        /// Month to show (YYYY-MM, default: this month)
        #[arg(long)]
        month: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MedCommands {
    /// Add a medication
    Add {
        /// Medication name
        name: String,
        /// Dosage (e.g. "10mg")
        #[arg(short, long)]
        dosage: Option<String>,
        /// Frequency (e.g. "daily")
        #[arg(short, long)]
        frequency: Option<String>,
        /// Start date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        start: Option<String>,
        /// Time of the dose (e.g. "8:00 AM" or "20:30", default: midnight)
        #[arg(long)]
        time: Option<String>,
        /// Last day of the course (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List medications, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a medication's name, dosage, frequency or end date
    Edit {
        /// Medication id or name
        medication: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New dosage
        #[arg(short, long)]
        dosage: Option<String>,
        /// New frequency
        #[arg(short, long)]
        frequency: Option<String>,
        /// New end date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
        /// Remove the end date
        #[arg(long)]
        clear_end: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a medication
    Delete {
        /// Medication id or name
        medication: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_store(config: &Config) -> Result<Arc<dyn RemoteStore>> {
    match &config.remote {
        Some(remote) => {
            debug!(url = %remote.url, "using remote store");
            Ok(Arc::new(RestStore::new(remote)?))
        }
        None => {
            debug!(path = %config.db_path.display(), "using local store");
            let store = SqliteStore::open(&config.db_path).with_context(|| {
                format!("Failed to open database: {}", config.db_path.display())
            })?;
            Ok(Arc::new(store))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let tracker = MedTracker::new(open_store(&config)?, Arc::new(SystemClock), config.photo_policy);
    if let Some(user) = config.load_session()? {
        tracker.sign_in(&user)?;
    }

    match cli.command {
        Commands::Login { user, json } => cmd_login(&config, &tracker, &user, json),
        Commands::Logout { json } => cmd_logout(&config, &tracker, json),
        Commands::Whoami { json } => cmd_whoami(&config, &tracker, json),
        Commands::Med { command } => match command {
            MedCommands::Add {
                name,
                dosage,
                frequency,
                start,
                time,
                end,
                json,
            } => {
                let args = AddArgs {
                    name,
                    dosage,
                    frequency,
                    start,
                    time,
                    end,
                };
                cmd_med_add(&tracker, args, json).await
            }
            MedCommands::List { json } => cmd_med_list(&tracker, json).await,
            MedCommands::Edit {
                medication,
                name,
                dosage,
                frequency,
                end,
                clear_end,
                json,
            } => {
                let args = EditArgs {
                    name,
                    dosage,
                    frequency,
                    end,
                    clear_end,
                };
                cmd_med_edit(&tracker, &medication, args, json).await
            }
            MedCommands::Delete {
                medication,
                yes,
                json,
            } => cmd_med_delete(&tracker, &medication, yes, json).await,
        },
        Commands::Take {
            medication,
            photo,
            json,
        } => cmd_take(&tracker, &medication, photo.as_deref(), json).await,
        Commands::Today { date, json } => cmd_today(&tracker, date, json).await,
        Commands::Overview { date, json } => cmd_overview(&tracker, date, json).await,
        Commands::Calendar { month, json } => cmd_calendar(&tracker, month, json).await,
    }
}
