//! Lifecycle rules of a task.
//!
//! ```text
//! PENDING -> RUNNING
//! RUNNING -> COMPLETED | FAILED | STOPPED | PAUSED
//! PAUSED  -> RUNNING
//! ```
//!
//! Terminal states have no outgoing edge. [`reopen`] is the single way back
//! to PENDING and is only taken by the retry and breakpoint-resume paths.

use prompt_lab_core::{CoreError, Result, TaskStatus};

pub fn is_legal(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    matches!(
        (from, to),
        (Pending, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Stopped)
            | (Running, Paused)
            | (Paused, Running)
    )
}

pub fn allowed_transitions(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;

    match from {
        Pending => &[Running],
        Running => &[Completed, Failed, Stopped, Paused],
        Paused => &[Running],
        Completed | Failed | Stopped => &[],
    }
}

/// Moves `status` to `to`, or leaves it untouched and reports the rejected edge.
/// Returns the previous status.
pub fn transition(status: &mut TaskStatus, to: TaskStatus) -> Result<TaskStatus> {
    let from = *status;
    if !is_legal(from, to) {
        return Err(CoreError::InvalidTransition { from, to });
    }

    tracing::trace!(%from, %to, "task transition");
    *status = to;
    Ok(from)
}

/// Terminal -> PENDING, so that a finished task can be driven again.
pub fn reopen(status: &mut TaskStatus) -> Result<TaskStatus> {
    let from = *status;
    if !from.is_terminal() {
        return Err(CoreError::InvalidTransition {
            from,
            to: TaskStatus::Pending,
        });
    }

    tracing::trace!(%from, "task reopened");
    *status = TaskStatus::Pending;
    Ok(from)
}
