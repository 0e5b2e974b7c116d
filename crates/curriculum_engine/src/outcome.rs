//! Commit outcomes reported to the caller.

use crate::queue::OperationResult;
use curriculum_model::Operation;
use std::fmt;

/// Why a commit did not run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The commit's cancellation token was triggered.
    Cancelled,
    /// The pre-commit hook rejected the operations.
    Vetoed,
    /// Another commit or retry was already running.
    Busy,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AbortReason::Cancelled => "cancelled",
            AbortReason::Vetoed => "rejected by pre-commit hook",
            AbortReason::Busy => "another commit is in progress",
        })
    }
}

/// Result of [`commit`](crate::CurriculumController::commit) or
/// [`retry_failed`](crate::CurriculumController::retry_failed).
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum CommitOutcome {
    /// Every operation was applied.
    Committed {
        /// Number of operations executed.
        applied: usize,
    },
    /// Some operations failed; the rest were applied.
    PartialFailure {
        /// Results of the failed operations.
        failed: Vec<OperationResult>,
    },
    /// The commit stopped early. No operation is reported as failed.
    Aborted(AbortReason),
}

impl CommitOutcome {
    /// Returns true if everything was applied.
    pub fn is_success(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }

    /// Returns true if the commit was aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, CommitOutcome::Aborted(_))
    }

    /// Returns the operations that failed.
    pub fn failed_ops(&self) -> Vec<Operation> {
        match self {
            CommitOutcome::PartialFailure { failed } => {
                failed.iter().map(|result| result.operation.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Returns the number of failed operations.
    pub fn failed_count(&self) -> usize {
        match self {
            CommitOutcome::PartialFailure { failed } => failed.len(),
            _ => 0,
        }
    }
}

impl fmt::Display for CommitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOutcome::Committed { applied } => write!(f, "committed {applied} operations"),
            CommitOutcome::PartialFailure { failed } if failed.len() == 1 => {
                f.write_str("1 operation failed; retry available")
            }
            CommitOutcome::PartialFailure { failed } => {
                write!(f, "{} operations failed; retry available", failed.len())
            }
            CommitOutcome::Aborted(reason) => write!(f, "commit aborted: {reason}"),
        }
    }
}
