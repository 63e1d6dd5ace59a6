use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use provctl::config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use provctl::dialog::{PresetDialog, TerminalDialog};
use provctl::error::ConfigError;
use provctl::normalizer::{is_valid_pattern, TimestampStyle};
use provctl::output;
use provctl::{
    ActionOutcome, HistoryEntry, HistoryOutcome, HttpApi, Notice, Record, RecordId, Synchronizer,
    Verification,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage and audit data provenance records", long_about = None)]
struct Args {
    /// Base url of the provenance backend
    #[arg(long, env = "PROVENANCE_API_URL", default_value = DEFAULT_BASE_URL, global = true)]
    api_url: String,

    /// Request timeout in seconds
    #[arg(long, env = "PROVENANCE_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    timeout: u64,

    /// `table`, `json`, or a .json/.jsonl/.csv/.tsv file path
    #[arg(short, long, default_value = "table", global = true)]
    output: String,

    /// Show timestamps in UTC instead of the local zone
    #[arg(long, global = true)]
    utc: bool,

    /// strftime pattern for timestamps
    #[arg(long, global = true)]
    time_format: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all records
    Records,
    /// Add a record
    Add {
        #[arg(long)]
        user: String,
        #[arg(long)]
        data: String,
    },
    /// Update a record; missing values are prompted for
    Update {
        id: String,
        #[arg(long)]
        data: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// Current value, offered as the prompt default
        #[arg(long)]
        current: Option<String>,
    },
    /// Delete a record
    Delete {
        id: String,
        #[arg(long)]
        user: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Verify a record against its provenance log and the chain
    Verify { id: String },
    /// Show the audit history of a record id, including deleted records
    History { id: String },
    /// Delete every record and log row (development backends only)
    Reset {
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = ClientConfig::new(&args.api_url)
        .with_timeout_secs(args.timeout)
        .validate()?;
    let style = timestamp_style(args.utc, args.time_format.as_deref())?;
    let api = HttpApi::new(&config).context("building http client")?;

    match run(args, api, style).await {
        Ok(code) => Ok(code),
        Err(e) => {
            error!("{:#}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// What an action leaves for the writer.
enum Report {
    Records(Vec<Record>),
    History(Vec<HistoryEntry>),
    Verification(Verification),
}

async fn run(args: Args, api: HttpApi, style: TimestampStyle) -> Result<ExitCode> {
    let target = args.output;
    output::check_output(&target)?;
    let (code, report) = act(args.command, api).await?;

    // only opened once there is something to write
    if let Some(report) = report {
        let mut writer = output::create_writer(&target, style)?;
        match &report {
            Report::Records(rows) => writer.write_records(rows)?,
            Report::History(rows) => writer.write_history(rows)?,
            Report::Verification(v) => writer.write_verification(v)?,
        }
        writer.finish()?;
    }
    Ok(code)
}

async fn act(command: Command, api: HttpApi) -> Result<(ExitCode, Option<Report>)> {
    let mut dialog = PresetDialog::new(TerminalDialog::new());

    let done = |rows: Vec<Record>| (ExitCode::SUCCESS, Some(Report::Records(rows)));
    let outcome = match command {
        Command::Records => {
            let sync = Synchronizer::start(api, dialog).await?;
            done(sync.records())
        }
        Command::Add { user, data } => {
            let sync = Synchronizer::new(api, dialog);
            match sync.add_record(&user, &data).await? {
                ActionOutcome::Completed(()) => done(sync.records()),
                ActionOutcome::Aborted(notice) => (aborted(&notice), None),
            }
        }
        Command::Update {
            id,
            data,
            user,
            current,
        } => {
            dialog = dialog.data(data).user(user);
            let sync = Synchronizer::new(api, dialog);
            let id = RecordId::from(id.trim());
            match sync
                .update_record(&id, current.as_deref().unwrap_or_default())
                .await?
            {
                ActionOutcome::Completed(()) => done(sync.records()),
                ActionOutcome::Aborted(notice) => (aborted(&notice), None),
            }
        }
        Command::Delete { id, user, yes } => {
            dialog = dialog.user(user).assume_yes(yes);
            let sync = Synchronizer::new(api, dialog);
            let id = RecordId::from(id.trim());
            match sync.delete_record(&id).await? {
                ActionOutcome::Completed(()) => done(sync.records()),
                ActionOutcome::Aborted(notice) => (aborted(&notice), None),
            }
        }
        Command::Verify { id } => {
            let sync = Synchronizer::new(api, dialog);
            let verification = sync.verify_record(&RecordId::from(id.trim())).await?;
            let code = if verification.is_verified() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
            (code, Some(Report::Verification(verification)))
        }
        Command::History { id } => {
            let sync = Synchronizer::new(api, dialog);
            match sync.search_history_by_id(&id).await? {
                ActionOutcome::Completed(HistoryOutcome::Applied(_)) => {
                    (ExitCode::SUCCESS, Some(Report::History(sync.history())))
                }
                ActionOutcome::Completed(HistoryOutcome::Superseded) => (ExitCode::SUCCESS, None),
                ActionOutcome::Aborted(notice) => (aborted(&notice), None),
            }
        }
        Command::Reset { yes } => {
            dialog = dialog.assume_yes(yes);
            let sync = Synchronizer::new(api, dialog);
            match sync.reset_backend().await? {
                ActionOutcome::Completed(()) => {
                    eprintln!("All records and provenance logs deleted.");
                    (ExitCode::SUCCESS, None)
                }
                ActionOutcome::Aborted(notice) => (aborted(&notice), None),
            }
        }
    };
    Ok(outcome)
}

fn aborted(notice: &Notice) -> ExitCode {
    eprintln!("{}", notice);
    match notice {
        Notice::Validation(_) => ExitCode::from(2),
        Notice::Cancelled(_) => ExitCode::from(3),
    }
}

fn timestamp_style(utc: bool, pattern: Option<&str>) -> Result<TimestampStyle, ConfigError> {
    let mut style = if utc {
        TimestampStyle::utc()
    } else {
        TimestampStyle::default()
    };
    if let Some(pattern) = pattern {
        if !is_valid_pattern(pattern) {
            return Err(ConfigError::TimeFormat(pattern.to_string()));
        }
        style = style.with_pattern(pattern);
    }
    Ok(style)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "provctl=debug" } else { "provctl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
