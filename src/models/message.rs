use super::task::{TaskId, TaskStatus};

/// Lifecycle reports sent from send loops to the manager's supervisor thread.
#[derive(Debug)]
pub enum TaskMessage {
    UpdateStatus(TaskId, TaskStatus),
    /// The loop ended on its own (setup failure) and can be reaped.
    Finished(TaskId),
}
