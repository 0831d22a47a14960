use easel_core::{ArtifactDescriptor, FailureInfo, Fingerprint, GenerationRequest};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique batch identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for BatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Job lifecycle states
///
/// `queued → running → {done | error}`, with `cancelled` reachable from
/// `queued` or `running`. A running job honors cancellation cooperatively:
/// the in-flight attempt finishes, its cache effect stands, and the job is
/// reported cancelled regardless of the attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Whether the job can never transition again
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

/// Snapshot of one unit of generation work
///
/// Owned exclusively by the dispatcher; everyone else sees clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub fingerprint: Fingerprint,
    pub request: GenerationRequest,
    pub status: JobStatus,
    /// Adapter invocations so far
    pub attempts: u32,
    /// Most recent terminal or retried failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<FailureInfo>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Set only once the job is `done` (or a cancelled attempt succeeded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactDescriptor>,
}

impl GenerationJob {
    /// Fresh queued job for a request
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            id: JobId::new(),
            fingerprint: Fingerprint::of(&request),
            request,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            created_at: Timestamp::now(),
            started_at: None,
            finished_at: None,
            artifact: None,
        }
    }
}

/// Aggregate batch status, derived from member jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Done,
    Error,
    Cancelled,
}

impl BatchStatus {
    /// Derive the aggregate from member statuses
    ///
    /// `done` iff every member is done; `error` once every member is
    /// terminal and at least one failed; `cancelled` when terminal with
    /// cancellations but no failures; otherwise `running`. Partial
    /// successes stay visible per job either way.
    pub fn derive(members: impl IntoIterator<Item = JobStatus>) -> Self {
        let mut all_terminal = true;
        let mut any_error = false;
        let mut any_cancelled = false;
        let mut seen = false;

        for status in members {
            seen = true;
            all_terminal &= status.is_terminal();
            any_error |= status == JobStatus::Error;
            any_cancelled |= status == JobStatus::Cancelled;
        }

        if !seen || !all_terminal {
            return Self::Running;
        }
        if any_error {
            Self::Error
        } else if any_cancelled {
            Self::Cancelled
        } else {
            Self::Done
        }
    }
}

/// Point-in-time view of a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub id: BatchId,
    pub status: BatchStatus,
    /// Distinct member jobs, in submission order (duplicates collapsed)
    pub jobs: Vec<GenerationJob>,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn aggregate_running_while_any_member_pending() {
        let status = BatchStatus::derive([JobStatus::Done, JobStatus::Running, JobStatus::Done]);
        assert_eq!(status, BatchStatus::Running);
    }

    #[test]
    fn aggregate_error_once_all_terminal() {
        // Still running: the failed member is terminal but a sibling is not
        assert_eq!(
            BatchStatus::derive([JobStatus::Error, JobStatus::Queued]),
            BatchStatus::Running
        );
        assert_eq!(
            BatchStatus::derive([JobStatus::Error, JobStatus::Done]),
            BatchStatus::Error
        );
    }

    #[test]
    fn aggregate_done_only_when_all_done() {
        assert_eq!(
            BatchStatus::derive([JobStatus::Done, JobStatus::Done]),
            BatchStatus::Done
        );
    }

    #[test]
    fn aggregate_cancelled_without_failures() {
        assert_eq!(
            BatchStatus::derive([JobStatus::Cancelled, JobStatus::Done]),
            BatchStatus::Cancelled
        );
        assert_eq!(
            BatchStatus::derive([JobStatus::Cancelled, JobStatus::Error]),
            BatchStatus::Error
        );
    }
}
