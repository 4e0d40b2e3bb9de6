//! Exit code logic for the queue process.
//!
//! Maps the final queue counts to the process exit outcome.

use ytdl_queue::StatusCounts;

use crate::ProcessExit;

/// Determines the process exit outcome from completed and failed counts.
pub(crate) fn determine_exit_outcome(completed: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

/// Outcome of a run. An interrupted run always fails so scripts notice that
/// work is left in the queue. Skipped (invalid) inputs count as failures.
pub(crate) fn outcome_for_run(counts: &StatusCounts, rejected: usize, interrupted: bool) -> ProcessExit {
    if interrupted {
        return ProcessExit::Failure;
    }
    determine_exit_outcome(counts.completed, counts.failed + rejected)
}
