use crate::models::{Task, TaskType};

/// What the runner should do with a fetched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Issue the completion call now.
    CompleteNow,
    /// Progress below target; re-evaluated on the next scheduled run only,
    /// never polled in-between.
    Defer,
    /// Explicitly ignored task type.
    Skip,
    /// Unrecognized task type; logged as a warning and skipped.
    Unknown,
}

/// Pure classification of a task record. Sign-in tasks complete
/// unconditionally; progress tasks complete once value reaches target.
pub fn classify(task: &Task) -> Action {
    match task.task_type {
        TaskType::SignIn => Action::CompleteNow,
        TaskType::Progress => {
            if task.value >= task.target {
                Action::CompleteNow
            } else {
                Action::Defer
            }
        }
        TaskType::Ignored => Action::Skip,
        TaskType::Unknown(_) => Action::Unknown,
    }
}
