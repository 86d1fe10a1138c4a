// Progress monitor: polls a scan job until it reaches a terminal state.
//
// The loop is bounded twice: `max_attempts` caps the total number of
// status requests, and `max_transport_retries` caps consecutive network
// failures. Hitting either cap ends in the local `Unreachable` state.
// Each status request also has its own timeout, so a server that accepts
// the connection and never answers is just another transport failure.
// Snapshots only ever move forward through the lifecycle; a response that
// would move backwards is logged and dropped.

use crate::api::ApiClient;
use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound for the delay between retries after transport failures.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Lifecycle of a scan job. `Unreachable` is never reported by the service;
/// it is how the monitor says it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    Queued,
    Running,
    Completed,
    Failed,
    Unreachable,
}

impl ScanState {
    /// Position in the lifecycle. Terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            ScanState::Queued => 0,
            ScanState::Running => 1,
            ScanState::Completed | ScanState::Failed | ScanState::Unreachable => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Map a server state string. Unknown strings give `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let state = match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "waiting" => ScanState::Queued,
            "running" | "in_progress" | "processing" | "scanning" => ScanState::Running,
            "completed" | "complete" | "done" | "finished" | "success" => ScanState::Completed,
            "failed" | "error" | "failure" => ScanState::Failed,
            _ => return None,
        };
        Some(state)
    }

    /// Exit code the CLI uses when a scan ends in this state.
    pub fn exit_code(self) -> i32 {
        match self {
            ScanState::Completed => 0,
            ScanState::Failed => 3,
            ScanState::Unreachable => 4,
            ScanState::Queued | ScanState::Running => 5,
        }
    }
}

impl PartialOrd for ScanState {
    // Distinct terminal states are incomparable rather than equal.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => None,
            ord => Some(ord),
        }
    }
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanState::Queued => "QUEUED",
            ScanState::Running => "RUNNING",
            ScanState::Completed => "COMPLETED",
            ScanState::Failed => "FAILED",
            ScanState::Unreachable => "UNREACHABLE",
        };
        f.write_str(s)
    }
}

/// Read-only snapshot of a job's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanStatus {
    pub state: ScanState,
    pub severities: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanStatus {
    /// Total findings across all severities.
    pub fn total_findings(&self) -> u64 {
        self.severities.values().sum()
    }
}

/// Wire shape of `GET /api/scan/status/{id}`. Older deployments send the
/// state as `status`; some send both, in which case `state` wins.
#[derive(Deserialize, Debug, Default)]
struct StatusResponse {
    #[serde(default)]
    state: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<serde_json::Value>,
    #[serde(default)]
    severities: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl StatusResponse {
    fn raw_state(&self) -> Option<&str> {
        [&self.state, &self.status]
            .into_iter()
            .find_map(|v| v.as_ref().and_then(serde_json::Value::as_str))
    }
}

/// Severity counts from whatever the service sent. Whole floats are
/// accepted; nulls, negatives and non-numbers are skipped.
fn severity_counts(job_id: &str, raw: Option<serde_json::Value>) -> BTreeMap<String, u64> {
    let map = match raw {
        None | Some(serde_json::Value::Null) => return BTreeMap::new(),
        Some(serde_json::Value::Object(map)) => map,
        Some(other) => {
            warn!(job_id, severities = %other, "monitor.protocol_violation.severities");
            return BTreeMap::new();
        }
    };
    let mut out = BTreeMap::new();
    for (name, value) in map {
        let count = value.as_u64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        });
        match count {
            Some(n) => {
                out.insert(name, n);
            }
            None => warn!(job_id, severity = %name, %value, "monitor.protocol_violation.severity_count"),
        }
    }
    out
}

/// Polling knobs.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// Consecutive transport failures tolerated before giving up.
    pub max_transport_retries: u32,
    /// Limit for a single status request. A request that runs past it
    /// counts as a transport failure.
    pub request_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 120,
            max_transport_retries: 3,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub fn status_path(job_id: &str) -> String {
    format!("/api/scan/status/{}", urlencoding::encode(job_id))
}

/// Poll until terminal, discarding intermediate snapshots.
pub async fn watch(
    client: &ApiClient,
    job_id: &str,
    config: &MonitorConfig,
    cancel: &CancellationToken,
) -> Result<ScanStatus> {
    monitor(client, job_id, config, cancel, |_| {}).await
}

/// Poll until terminal. `on_snapshot` sees every accepted snapshot in
/// lifecycle order, the final one included.
pub async fn monitor<F>(
    client: &ApiClient,
    job_id: &str,
    config: &MonitorConfig,
    cancel: &CancellationToken,
    mut on_snapshot: F,
) -> Result<ScanStatus>
where
    F: FnMut(&ScanStatus),
{
    let path = status_path(job_id);
    let mut last: Option<ScanStatus> = None;
    let mut transport_failures = 0u32;

    let cancelled = |last: &Option<ScanStatus>| ScanError::Cancelled {
        job_id: Some(job_id.to_string()),
        last_status: last.clone(),
    };

    for attempt in 1..=config.max_attempts {
        debug!(job_id, attempt, "monitor.poll");
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(&last)),
            res = client.get_with_timeout(&path, config.request_timeout) => res,
        };

        let delay = match res {
            Ok(body) => {
                transport_failures = 0;
                let wire: StatusResponse = body.json()?;
                if let Some(status) = accept(job_id, wire, last.as_ref()) {
                    on_snapshot(&status);
                    if status.state.is_terminal() {
                        info!(job_id, state = %status.state, attempt, "monitor.finished");
                        return Ok(status);
                    }
                    last = Some(status);
                }
                config.poll_interval
            }
            Err(e) if e.is_retryable() => {
                transport_failures += 1;
                warn!(job_id, attempt, failures = transport_failures, error = %e, "monitor.poll.transport_error");
                if transport_failures >= config.max_transport_retries {
                    let detail = format!("{transport_failures} consecutive transport failures, last: {e}");
                    return Ok(unreachable(job_id, &last, detail, &mut on_snapshot));
                }
                backoff(config.poll_interval, transport_failures)
            }
            Err(e) => return Err(e),
        };

        if attempt < config.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(&last)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    let detail = format!("no terminal state after {} polls", config.max_attempts);
    Ok(unreachable(job_id, &last, detail, &mut on_snapshot))
}

/// Turn a wire response into a snapshot, or `None` when it must be ignored.
fn accept(job_id: &str, wire: StatusResponse, last: Option<&ScanStatus>) -> Option<ScanStatus> {
    let Some(raw) = wire.raw_state() else {
        warn!(job_id, "monitor.protocol_violation.missing_state");
        return None;
    };
    let Some(state) = ScanState::parse(raw) else {
        warn!(job_id, state = %raw, "monitor.protocol_violation.unknown_state");
        return None;
    };
    if let Some(prev) = last {
        if state < prev.state {
            warn!(job_id, from = %prev.state, to = %state, "monitor.protocol_violation.backward_transition");
            return None;
        }
    }
    Some(ScanStatus {
        state,
        severities: severity_counts(job_id, wire.severities),
        error: wire.error,
    })
}

fn unreachable<F>(job_id: &str, last: &Option<ScanStatus>, detail: String, on_snapshot: &mut F) -> ScanStatus
where
    F: FnMut(&ScanStatus),
{
    warn!(job_id, %detail, "monitor.unreachable");
    let status = ScanStatus {
        state: ScanState::Unreachable,
        severities: last.as_ref().map(|s| s.severities.clone()).unwrap_or_default(),
        error: Some(detail),
    };
    on_snapshot(&status);
    status
}

/// `base * 2^(failures-1)`, capped.
fn backoff(base: Duration, failures: u32) -> Duration {
    let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
}
