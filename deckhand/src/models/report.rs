//! Run report models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of the captured output excerpt per result
const EXCERPT_LIMIT: usize = 400;

/// Outcome of one task invocation against one host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Command exited zero (or the external check acknowledged)
    Success,

    /// Command exited non-zero, timed out, or could not be rendered
    Failed,

    /// Task did not run on this host for this run
    Skipped,
}

/// Result of one task invocation against one host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task name
    pub task: String,

    /// Target host id, or "-" for a skipped task
    pub host: String,

    /// Invocation status
    pub status: TaskStatus,

    /// Remote exit status, when a command actually ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,

    /// Truncated command output, or the skip/failure reason
    pub output_excerpt: String,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl TaskResult {
    /// Record a task that was not attempted for this run
    pub fn skipped(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            host: "-".to_string(),
            status: TaskStatus::Skipped,
            exit_status: None,
            output_excerpt: reason.into(),
            duration_ms: 0,
        }
    }

    /// Truncate command output to the excerpt limit
    pub fn excerpt(output: &str) -> String {
        let trimmed = output.trim();
        if trimmed.len() <= EXCERPT_LIMIT {
            trimmed.to_string()
        } else {
            let mut cut = EXCERPT_LIMIT;
            while !trimmed.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &trimmed[..cut])
        }
    }
}

/// Terminal state of a deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every non-best-effort task succeeded
    Completed,

    /// A task or the external check failed mid-run
    Failed,

    /// A configuration error stopped the run before any task
    Aborted,
}

/// Full report for one deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run id
    pub run_id: String,

    /// Application name
    pub application: String,

    /// Requested stage
    pub stage: String,

    /// Run start time
    pub started_at: DateTime<Utc>,

    /// Run end time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Terminal outcome
    pub outcome: RunOutcome,

    /// Run-level fault, when the run did not complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Every attempted task/host pair, in execution order
    pub results: Vec<TaskResult>,
}

impl RunReport {
    /// Start a report for a new run
    pub fn new(application: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            application: application.into(),
            stage: stage.into(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: RunOutcome::Failed,
            error: None,
            results: Vec::new(),
        }
    }

    /// Report for a run aborted before any task was attempted
    pub fn aborted(
        application: impl Into<String>,
        stage: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut report = Self::new(application, stage);
        report.outcome = RunOutcome::Aborted;
        report.error = Some(error.into());
        report.finished_at = Some(Utc::now());
        report
    }

    /// Mark the run completed
    pub fn complete(&mut self) {
        self.outcome = RunOutcome::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the run failed
    pub fn fail(&mut self, error: impl Into<String>) {
        self.outcome = RunOutcome::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    /// Whether the run reached its terminal Completed state
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Process exit code for the CLI contract
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            RunOutcome::Completed => 0,
            RunOutcome::Failed => 1,
            RunOutcome::Aborted => 2,
        }
    }
}
