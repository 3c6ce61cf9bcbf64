mod manage;
mod run;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use rollcall_types::{Frequency, MessageKind};

#[derive(Parser)]
#[command(name = "rollcall", about = "Recurring attendance summary SMS notifier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler daemon (daily sweep at the configured time)
    Run,
    /// Execute exactly one sweep now and print the report
    Sweep,
    /// Manage recipients
    Recipient {
        #[command(subcommand)]
        command: RecipientCommands,
    },
    /// Manage schedules
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// Show recent delivery-log entries, newest first
    Logs {
        /// Maximum entries to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show recent sweep runs, newest first
    Runs {
        /// Maximum entries to show
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum RecipientCommands {
    /// Enroll a phone number under a schedule
    Add {
        /// Destination phone number (local or international format)
        #[arg(long)]
        phone: String,

        /// Schedule id to enroll under
        #[arg(long)]
        schedule: String,

        /// Recurrence (daily/weekly/monthly/quarterly/annually);
        /// defaults to the schedule's frequency
        #[arg(long)]
        frequency: Option<Frequency>,

        /// Anchor date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Send the admin aggregate instead of the per-member summary
        #[arg(long)]
        admin: bool,
    },
    /// List all recipients
    List,
    /// Re-activate a recipient (clears retry state)
    Activate { id: String },
    /// Deactivate a recipient
    Deactivate { id: String },
}

#[derive(Subcommand)]
enum ScheduleCommands {
    /// Create or update a schedule
    Add {
        /// Schedule id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Display name
        #[arg(long)]
        name: String,

        /// SMS sender id (max 11 characters)
        #[arg(long)]
        sender: String,

        /// Default recurrence for recipients
        #[arg(long)]
        frequency: Frequency,

        /// Attendance event id to summarize
        #[arg(long)]
        event_id: String,

        /// Tenant/client code
        #[arg(long)]
        client: String,

        /// Template for per-member messages
        #[arg(long)]
        user_template: String,

        /// Template for admin aggregate messages
        #[arg(long)]
        admin_template: String,

        /// Hour of day anchor (0-23)
        #[arg(long)]
        send_hour: Option<u32>,
    },
    /// List all schedules
    List,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = rollcall_config::load_config()?;
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Run => rt.block_on(run::run_daemon(config)),
        Commands::Sweep => rt.block_on(run::run_once(config)),
        Commands::Recipient { command } => match command {
            RecipientCommands::Add {
                phone,
                schedule,
                frequency,
                start_date,
                admin,
            } => rt.block_on(manage::add_recipient(
                config,
                &phone,
                &schedule,
                frequency,
                start_date,
                if admin { MessageKind::Admin } else { MessageKind::User },
            )),
            RecipientCommands::List => rt.block_on(manage::list_recipients(config)),
            RecipientCommands::Activate { id } => {
                rt.block_on(manage::set_recipient_active(config, &id, true))
            }
            RecipientCommands::Deactivate { id } => {
                rt.block_on(manage::set_recipient_active(config, &id, false))
            }
        },
        Commands::Schedule { command } => match command {
            ScheduleCommands::Add {
                id,
                name,
                sender,
                frequency,
                event_id,
                client,
                user_template,
                admin_template,
                send_hour,
            } => rt.block_on(manage::add_schedule(manage::NewSchedule {
                config,
                id,
                name,
                sender,
                frequency,
                event_id,
                client,
                user_template,
                admin_template,
                send_hour,
            })),
            ScheduleCommands::List => rt.block_on(manage::list_schedules(config)),
        },
        Commands::Logs { limit } => rt.block_on(manage::show_logs(config, limit)),
        Commands::Runs { limit } => rt.block_on(manage::show_runs(config, limit)),
    }
}
