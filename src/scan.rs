// Scan submitter: archive a directory, upload it and get a job id back.

use crate::api::{ApiClient, Payload};
use crate::archive::{self, ArchiveArtifact};
use crate::error::{Result, ScanError};
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const START_PATH: &str = "/api/scan/start";
/// Multipart field carrying the archive.
pub const FILE_FIELD: &str = "upfile";
/// Multipart field carrying the project key.
pub const PROJECT_FIELD: &str = "project";
const UPLOAD_FILE_NAME: &str = "target.zip";

/// One remote scan, created exactly once per submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanJob {
    pub id: String,
    pub project_key: String,
    pub created_at: DateTime<Utc>,
}

/// Deployments name the id `scanId`, `scan_id` or `id`, and some send more
/// than one of them. Each key gets its own field so that is not a
/// duplicate-field error.
#[derive(Deserialize)]
struct StartResponse {
    #[serde(rename = "scanId", default)]
    scan_id_camel: Option<serde_json::Value>,
    #[serde(default)]
    scan_id: Option<serde_json::Value>,
    #[serde(default)]
    id: Option<serde_json::Value>,
}

impl StartResponse {
    /// The first usable id in `scanId`, `scan_id`, `id` order. Numeric ids
    /// are accepted as well.
    fn job_id(self) -> Option<String> {
        [self.scan_id_camel, self.scan_id, self.id]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

/// Archive `source_dir`, upload it for `project_key` and return the job.
///
/// The archive is deleted before this returns, on every path. Archiver and
/// transport errors come back unchanged; only an unusable response body
/// becomes `ScanError::Protocol`.
pub async fn submit(
    client: &ApiClient,
    project_key: &str,
    source_dir: &std::path::Path,
    cancel: &CancellationToken,
) -> Result<ScanJob> {
    info!(project = project_key, source = %source_dir.display(), "scan.submit.start");
    let artifact = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ScanError::Cancelled { job_id: None, last_status: None }),
        res = archive::archive(source_dir, cancel) => res?,
    };

    let res = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScanError::Cancelled { job_id: None, last_status: None }),
        res = upload(client, project_key, &artifact) => res,
    };
    // The upload stream has finished or been dropped by now; removing the
    // file here never races with it.
    drop(artifact);

    let job = res?;
    info!(job_id = %job.id, project = project_key, "scan.submit.done");
    Ok(job)
}

async fn upload(client: &ApiClient, project_key: &str, artifact: &ArchiveArtifact) -> Result<ScanJob> {
    let file = tokio::fs::File::open(artifact.path())
        .await
        .map_err(|e| ScanError::io(artifact.path(), e))?;
    let part = Part::stream_with_length(reqwest::Body::wrap_stream(ReaderStream::new(file)), artifact.size())
        .file_name(UPLOAD_FILE_NAME)
        .mime_str("application/zip")?;
    let form = Form::new()
        .part(FILE_FIELD, part)
        .text(PROJECT_FIELD, project_key.to_string());

    debug!(source = %artifact.source_dir().display(), size = artifact.size(), "scan.upload");
    let body = client.post(START_PATH, Payload::Multipart(form)).await?;
    let parsed: StartResponse = body.json()?;
    let id = parsed
        .job_id()
        .ok_or_else(|| ScanError::protocol("scan start response has no scanId"))?;
    Ok(ScanJob { id, project_key: project_key.to_string(), created_at: Utc::now() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_response_accepts_id_aliases() {
        for raw in [r#"{"scanId":"a"}"#, r#"{"scan_id":"a"}"#, r#"{"id":"a"}"#] {
            let r: StartResponse = serde_json::from_str(raw).unwrap();
            assert_eq!(r.job_id().as_deref(), Some("a"), "{raw}");
        }
        let numeric: StartResponse = serde_json::from_str(r#"{"scanId":42}"#).unwrap();
        assert_eq!(numeric.job_id().as_deref(), Some("42"));
        for raw in [r#"{"other":1}"#, r#"{"scanId":""}"#, r#"{"scanId":null}"#, r#"{"id":true}"#] {
            let r: StartResponse = serde_json::from_str(raw).unwrap();
            assert!(r.job_id().is_none(), "{raw}");
        }
    }

    #[test]
    fn several_id_keys_prefer_scan_id() {
        let both: StartResponse = serde_json::from_str(r#"{"scanId":"abc","id":7}"#).unwrap();
        assert_eq!(both.job_id().as_deref(), Some("abc"));
        let all: StartResponse = serde_json::from_str(r#"{"id":"c","scan_id":"b","scanId":"a"}"#).unwrap();
        assert_eq!(all.job_id().as_deref(), Some("a"));
        let blank_first: StartResponse = serde_json::from_str(r#"{"scanId":"","id":9}"#).unwrap();
        assert_eq!(blank_first.job_id().as_deref(), Some("9"));
    }
}
