// Error kinds shared by every layer of the scan pipeline.
//
// Each failure surfaces as the most specific variant so the CLI (or any
// other caller) can branch on the kind instead of matching strings:
// re-auth on `Configuration`, back off on `Transport`, and so on.

use crate::monitor::ScanStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    /// The source directory has no entries; uploading it would be useless.
    #[error("the directory {path} is empty, nothing to archive")]
    EmptyInput { path: PathBuf },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Missing or unusable base URL, organization or access token.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The service could not be reached (refused, timeout, DNS, broken body).
    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-2xx status. `body` is kept verbatim.
    #[error("remote service returned {status}: {body}")]
    RemoteService { status: u16, body: String },

    /// The service answered 2xx but the payload was not what we expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Cancelled by the caller. `last_status` is the last snapshot seen
    /// before cancellation, if polling had started.
    #[error("cancelled{}", tracking(.job_id))]
    Cancelled {
        job_id: Option<String>,
        last_status: Option<ScanStatus>,
    },
}

fn tracking(job_id: &Option<String>) -> String {
    job_id.as_deref().map(|id| format!(" while tracking scan {id}")).unwrap_or_default()
}

impl ScanError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Only network-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Stable process exit code for the CLI layer.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::EmptyInput { .. } => 11,
            Self::Configuration(_) => 10,
            Self::Protocol(_) => 20,
            Self::Io { .. } => 30,
            Self::Transport { .. } => 40,
            Self::RemoteService { .. } => 41,
            Self::Cancelled { .. } => 130,
        }
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(source: reqwest::Error) -> Self {
        Self::Transport { source }
    }
}
