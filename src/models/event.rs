use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

impl Severity {
    pub fn level(self) -> log::Level {
        match self {
            Severity::Info | Severity::Success => log::Level::Info,
            Severity::Error => log::Level::Error,
        }
    }
}

/// One line of the live console.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    /// Position in the sink; strictly increasing across the whole process run.
    pub seq: u64,
    pub task_id: Option<TaskId>,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        if let Some(id) = &self.task_id {
            write!(f, "[{}] ", id)?;
        }
        match self.severity {
            Severity::Info => {}
            Severity::Success => f.write_str("OK ")?,
            Severity::Error => f.write_str("ERR ")?,
        }
        f.write_str(&self.message)
    }
}
