// Entrypoint for the CLI application.
// - Parses arguments, loads config, and hands work to the library.
// - Maps every outcome to a process exit code (see `ScanError::exit_code`
//   and `ScanState::exit_code`).

use clap::{Parser, Subcommand};
use codethreat_cli::api::ApiClient;
use codethreat_cli::config::{config_file_path, FileConfig, RemoteConfig};
use codethreat_cli::logging::{init_logging, LogFormat};
use codethreat_cli::{project, ui, MonitorConfig, Pipeline, ScanError};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "codethreat", version, about = "CodeThreat CLI - submit source trees for SAST scanning")]
struct Cli {
    /// trace|debug|info|warn|error
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Archive a directory, upload it and wait for the scan result
    Scan {
        /// Path to the target codebase
        #[arg(long)]
        target: PathBuf,
        /// Project name in CodeThreat
        #[arg(long)]
        project: String,
        /// Seconds between status polls
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
        /// Status polls before giving up
        #[arg(long, default_value_t = 120)]
        max_attempts: u32,
        /// Consecutive network failures tolerated while polling
        #[arg(long, default_value_t = 3)]
        max_transport_retries: u32,
        /// Seconds a single status request may take
        #[arg(long, default_value_t = 30)]
        request_timeout: u64,
        /// Print the final status as JSON on stdout
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Store a personal access token in the config file
    Auth {
        /// Token to store; prompted for when omitted
        #[arg(long)]
        key: Option<String>,
    },
    /// Project lookups
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// Show a project's details
    Show { name: String },
    /// Create an upload-type project
    Create { name: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_level, &cli.log_format) {
        eprintln!("error: {e:#}");
        process::exit(RUNTIME_EXIT_CODE);
    }
    let code = match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_of(&e)
        }
    };
    info!(exit_code = code, "cli.finished");
    process::exit(code);
}

async fn run(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Scan { target, project, poll_interval, max_attempts, max_transport_retries, request_timeout, json } => {
            let monitor_config = MonitorConfig {
                poll_interval: Duration::from_secs(poll_interval),
                max_attempts,
                max_transport_retries,
                request_timeout: Duration::from_secs(request_timeout),
            };
            let pipeline = Pipeline::new(ApiClient::new(RemoteConfig::load()?)?);

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("cli.interrupted");
                    on_ctrl_c.cancel();
                }
            });

            let mut progress = ui::ScanProgress::start(&target.display().to_string());
            let res = pipeline.run_with(&project, &target, &monitor_config, &cancel, &mut progress).await;
            progress.finish();

            let status = match res {
                Ok(status) => status,
                Err(ScanError::Cancelled { job_id, last_status: Some(last) }) => {
                    eprintln!("Cancelled; scan {} was last seen as:", job_id.unwrap_or_default());
                    ui::display_scan_status(&last);
                    return Ok(ScanError::Cancelled { job_id: None, last_status: None }.exit_code());
                }
                Err(e) => return Err(e.into()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                ui::display_scan_status(&status);
            }
            Ok(status.state.exit_code())
        }
        Commands::Auth { key } => {
            let token = match key {
                Some(k) => k,
                None => ui::prompt_token()?,
            };
            let path = config_file_path();
            let mut file = FileConfig::read(&path)?;
            file.access_token = Some(token);
            file.save(&path)?;
            println!("Token stored in {}", path.display());
            Ok(0)
        }
        Commands::Project { action } => {
            let client = ApiClient::new(RemoteConfig::load()?)?;
            match action {
                ProjectAction::Show { name } => {
                    let p = project::get_project(&client, &name).await?;
                    ui::display_project_info(&p);
                }
                ProjectAction::Create { name } => {
                    let created = project::create_project(&client, &name).await?;
                    println!("{}", serde_json::to_string_pretty(&created)?);
                }
            }
            Ok(0)
        }
    }
}

/// Exit code for a failed command: the scan error kind if there is one,
/// otherwise a generic runtime failure.
/// Exit code for failures that are not a `ScanError`.
const RUNTIME_EXIT_CODE: i32 = 20;

fn exit_code_of(e: &anyhow::Error) -> i32 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<ScanError>())
        .map(ScanError::exit_code)
        .unwrap_or(RUNTIME_EXIT_CODE)
}
