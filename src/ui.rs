// UI layer: everything that touches the terminal. The library core never
// prints; `main.rs` calls into this module to render what it gets back.

use crate::monitor::{ScanState, ScanStatus};
use crate::pipeline::PipelineObserver;
use crate::project::Project;
use crate::scan::ScanJob;
use anyhow::Result;
use crossterm::style::Stylize;
use dialoguer::Password;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while a scan is submitted and polled.
pub struct ScanProgress {
    spinner: ProgressBar,
}

impl ScanProgress {
    pub fn start(target: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        // The template is a constant; fall back to the default style if
        // indicatif ever rejects it.
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message(format!("Archiving and uploading {target}..."));
        Self { spinner }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl PipelineObserver for ScanProgress {
    fn job_created(&mut self, job: &ScanJob) {
        self.spinner.set_message(format!("Scan {} started", job.id));
    }

    fn snapshot(&mut self, status: &ScanStatus) {
        self.spinner
            .set_message(format!("Scan {} ({} findings so far)", status.state, status.total_findings()));
    }
}

/// Print the final scan outcome and its severity counts.
pub fn display_scan_status(status: &ScanStatus) {
    let headline = format!("Scan {}", status.state);
    match status.state {
        ScanState::Completed => println!("{}", headline.bold().green()),
        ScanState::Failed | ScanState::Unreachable => println!("{}", headline.bold().red()),
        ScanState::Queued | ScanState::Running => println!("{}", headline.bold().yellow()),
    }
    if let Some(err) = &status.error {
        println!("{} {}", "Reason:".yellow(), err);
    }
    println!("{}", "Severities:".yellow());
    if status.severities.is_empty() {
        println!("  none reported");
    }
    for (severity, count) in &status.severities {
        println!("  {}: {}", severity.as_str().cyan(), count.to_string().magenta());
    }
}

pub fn display_project_info(project: &Project) {
    let or_na = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".into());
    let or_zero = |v: Option<u64>| v.unwrap_or(0);
    println!("{}", "Project Information".bold().underlined());
    println!("{}", format!("Name: {}", project.project_name).green());
    println!("{}", format!("Owner: {}", or_na(&project.owner)).green());
    println!("{}", format!("Created by: {}", or_na(&project.created_by)).green());
    println!("{}", format!("Created at: {}", or_na(&project.created_at)).green());
    println!("{}", format!("Type: {}", or_na(&project.kind)).green());
    println!("{}", format!("Total LOC: {}", or_zero(project.total_loc)).green());
    println!("{}", format!("Total Files: {}", or_zero(project.total_files)).green());
    println!("{}", format!("Open Issues: {}", or_zero(project.open_issue)).green());
    println!("{}", format!("Closed Issues: {}", or_zero(project.closed_issue)).green());
    println!("{}", format!("Description: {}", or_na(&project.description)).green());

    println!("\n{}", "Integrations".bold().underlined());
    for (name, integration) in &project.integrations {
        if let Some(kind) = &integration.kind {
            println!("{}", format!("- {}: {}", capitalize(name), kind).cyan());
        }
    }

    println!("\n{}", "Team Members".bold().underlined());
    for member in &project.team {
        println!("{}", format!("- {member}").magenta());
    }
}

/// Ask for a personal access token with hidden, confirmed input.
pub fn prompt_token() -> Result<String> {
    let token = Password::new()
        .with_prompt("Personal Access Token")
        .with_confirmation("Repeat token", "Tokens do not match")
        .interact()?;
    Ok(token)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
