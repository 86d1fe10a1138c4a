// Pipeline orchestrator: submit a directory, then follow the job to the end.
//
// This is the only entry point the CLI uses for scanning. The first error
// from either stage stops the pipeline and comes back exactly as raised.

use crate::api::ApiClient;
use crate::error::{Result, ScanError};
use crate::monitor::{self, MonitorConfig, ScanStatus};
use crate::scan::{self, ScanJob};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

/// Progress notifications for callers that want to show something while a
/// scan runs. Both methods default to doing nothing.
pub trait PipelineObserver {
    fn job_created(&mut self, _job: &ScanJob) {}
    fn snapshot(&mut self, _status: &ScanStatus) {}
}

impl PipelineObserver for () {}

#[derive(Clone)]
pub struct Pipeline {
    client: ApiClient,
}

impl Pipeline {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Scan `source_dir` under `project_key` and return the terminal status.
    pub async fn run(
        &self,
        project_key: &str,
        source_dir: &Path,
        monitor_config: &MonitorConfig,
        cancel: &CancellationToken,
    ) -> Result<ScanStatus> {
        self.run_with(project_key, source_dir, monitor_config, cancel, &mut ()).await
    }

    /// `run` with progress reported to `observer`.
    pub async fn run_with<O: PipelineObserver>(
        &self,
        project_key: &str,
        source_dir: &Path,
        monitor_config: &MonitorConfig,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> Result<ScanStatus> {
        let span = info_span!("pipeline", project = project_key);
        async move {
            // Settings problems surface before the directory is touched.
            self.client.validate()?;
            let job = scan::submit(&self.client, project_key, source_dir, cancel).await?;
            observer.job_created(&job);
            let status = monitor::monitor(&self.client, &job.id, monitor_config, cancel, |s| {
                observer.snapshot(s)
            })
            .await?;
            info!(job_id = %job.id, state = %status.state, findings = status.total_findings(), "pipeline.finished");
            Ok::<_, ScanError>(status)
        }
        .instrument(span)
        .await
    }
}
