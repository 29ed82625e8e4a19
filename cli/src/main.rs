mod commands;
mod config;
mod scheduler;
mod server;
mod vendor;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    WindowArgs, cmd_cgm, cmd_device_add, cmd_device_show, cmd_exercise, cmd_export_quick,
    cmd_export_table, cmd_export_text, cmd_jobs_run, cmd_log, cmd_overview, cmd_profile_set,
    cmd_profile_show, cmd_quick, cmd_trend, cmd_vendor_set,
};
use crate::config::Config;
use glyco_core::models::CgmAnnotations;
use glyco_core::service::GlucoseService;

#[derive(Parser)]
#[command(
    name = "glyco",
    version,
    about = "Glucose log aggregation, CGM summaries and device sync"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage a user's glucose profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Log a glucose reading for a meal slot
    Log {
        /// User ID
        #[arg(short, long)]
        user: i64,
        /// Category: fasting, breakfast, lunch, dinner
        category: String,
        /// 1-hour (or fasting) glucose in mg/dL
        #[arg(short, long)]
        glucose: Option<f64>,
        /// 2-hour glucose in mg/dL
        #[arg(long = "glucose-2hr")]
        glucose_2hr: Option<f64>,
        /// Insulin units taken
        #[arg(long)]
        insulin: Option<f64>,
        /// Date (YYYY-MM-DD or today/yesterday, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Time of the reading ("YYYY-MM-DD HH:MM" or "HH:MM"); overrides --date
        #[arg(long)]
        at: Option<String>,
        /// Record the slot without a meal
        #[arg(long)]
        no_meal: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Per-category statistics and range percentages
    Overview {
        #[command(flatten)]
        window: WindowArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Peak glucose, in-range ratio and insulin average per category
    Quick {
        #[command(flatten)]
        window: WindowArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Daily averages plus window and 7-day averages
    Trend {
        #[command(flatten)]
        window: WindowArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// CGM-style summary with exercise totals
    Cgm {
        #[command(flatten)]
        window: WindowArgs,
        /// Active sensor time to echo back (e.g. "92%")
        #[arg(long)]
        active_time: Option<String>,
        /// Glucose management indicator to echo back
        #[arg(long)]
        gmi: Option<String>,
        /// Coefficient of variation to echo back
        #[arg(long)]
        cov: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Continuous monitor samples
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    /// Log exercise minutes
    Exercise {
        /// User ID
        #[arg(short, long)]
        user: i64,
        /// Duration in minutes
        minutes: f64,
        /// Date (YYYY-MM-DD or today/yesterday, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage CGM vendor credentials
    Vendor {
        #[command(subcommand)]
        command: VendorCommands,
    },
    /// Export reports as CSV or text
    Export {
        #[command(subcommand)]
        command: ExportCommands,
    },
    /// Run the reconciliation jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
        /// Run the daily jobs in the background
        #[arg(long)]
        schedule: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Create or update a profile
    Set {
        /// User ID
        #[arg(short, long)]
        user: i64,
        /// Postprandial interval: 1 or 2
        #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=2))]
        interval: u8,
        /// Device: N/A, libre, dexcom
        #[arg(short, long, default_value = "N/A")]
        device: String,
        /// Exclude the user from scheduled jobs
        #[arg(long)]
        inactive: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a profile
    Show {
        /// User ID
        #[arg(short, long)]
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DeviceCommands {
    /// Record one sample
    Add {
        /// User ID
        #[arg(short, long)]
        user: i64,
        /// Glucose in mg/dL
        value: f64,
        /// Sample time ("YYYY-MM-DD HH:MM[:SS]" or "HH:MM")
        #[arg(long)]
        at: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show samples grouped by day
    Show {
        /// User ID
        #[arg(short, long)]
        user: i64,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Last day (YYYY-MM-DD, default: today)
        #[arg(long)]
        to: Option<String>,
        /// Days ending at --to when --from is not given
        #[arg(short, long, default_value = "1")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum VendorCommands {
    /// Store the access token used for device sync
    Set {
        /// User ID
        #[arg(short, long)]
        user: i64,
        /// Vendor: libre or dexcom
        vendor: String,
        /// Access token
        #[arg(long)]
        token: String,
        /// Vendor account or connection id (required for libre)
        #[arg(long)]
        account_id: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ExportCommands {
    /// Category by date table (CSV)
    Table {
        #[command(flatten)]
        window: WindowArgs,
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Quick summary (CSV)
    Quick {
        #[command(flatten)]
        window: WindowArgs,
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Plain-text overview snapshot
    Text {
        #[command(flatten)]
        window: WindowArgs,
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Run one job by name, or `all`
    Run {
        /// fasting-autofill, missing-slot-backfill, device-sync or all
        #[arg(default_value = "all")]
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("glyco=info,glyco_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db_path = config
        .db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let svc = GlucoseService::new(db_path)?;

    match cli.command {
        Commands::Profile { command } => match command {
            ProfileCommands::Set {
                user,
                interval,
                device,
                inactive,
                json,
            } => cmd_profile_set(&svc, user, interval, &device, inactive, json),
            ProfileCommands::Show { user, json } => cmd_profile_show(&svc, user, json),
        },
        Commands::Log {
            user,
            category,
            glucose,
            glucose_2hr,
            insulin,
            date,
            at,
            no_meal,
            json,
        } => cmd_log(
            &svc,
            user,
            &category,
            glucose,
            glucose_2hr,
            insulin,
            date,
            at.as_deref(),
            no_meal,
            json,
        ),
        Commands::Overview { window, json } => cmd_overview(&svc, &window, json),
        Commands::Quick { window, json } => cmd_quick(&svc, &window, json),
        Commands::Trend { window, json } => cmd_trend(&svc, &window, json),
        Commands::Cgm {
            window,
            active_time,
            gmi,
            cov,
            json,
        } => {
            let annotations = CgmAnnotations {
                cgm_active_time: active_time,
                gmi,
                cov,
            };
            cmd_cgm(&svc, &window, annotations, json)
        }
        Commands::Device { command } => match command {
            DeviceCommands::Add {
                user,
                value,
                at,
                json,
            } => cmd_device_add(&svc, user, value, &at, json),
            DeviceCommands::Show {
                user,
                from,
                to,
                days,
                json,
            } => cmd_device_show(&svc, user, from, to, days, json),
        },
        Commands::Exercise {
            user,
            minutes,
            date,
            json,
        } => cmd_exercise(&svc, user, minutes, date, json),
        Commands::Vendor { command } => match command {
            VendorCommands::Set {
                user,
                vendor,
                token,
                account_id,
                json,
            } => cmd_vendor_set(&svc, user, &vendor, token, account_id, json),
        },
        Commands::Export { command } => match command {
            ExportCommands::Table { window, out } => {
                cmd_export_table(&svc, &window, out.as_deref())
            }
            ExportCommands::Quick { window, out } => {
                cmd_export_quick(&svc, &window, out.as_deref())
            }
            ExportCommands::Text { window, out } => cmd_export_text(&svc, &window, out.as_deref()),
        },
        Commands::Jobs { command } => match command {
            JobCommands::Run { name, json } => {
                cmd_jobs_run(&svc, &config.settings, &name, json).await
            }
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
            schedule,
        } => {
            let api_key = if no_auth {
                None
            } else {
                let (key, _) = config.load_or_create_api_key()?;
                Some(key)
            };
            let options = server::ServeOptions {
                port,
                bind,
                api_key,
                settings: config.settings,
                schedule,
            };
            server::start_server(svc, options).await
        }
    }
}
