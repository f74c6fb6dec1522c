use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

use chrono::{DateTime, Local};
use crossbeam_channel::Receiver;
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;

use crate::worker::worker::CancelSignal;

const TASK_ID_LEN: usize = 6;

/// Short, typeable identifier of an active task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn random() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TASK_ID_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        TaskId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        TaskId(value.trim().to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Created,
    Running,
    Stopping,
    Stopped,
    Finished,
}

/// Attempt counters shared between a send loop and its registry entry.
#[derive(Debug, Default)]
pub struct TaskStats {
    attempts: AtomicU64,
    failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl TaskStats {
    pub fn record_success(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, reason: impl Into<String>) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.note_error(reason);
    }

    /// Remembers a failure that is not a send attempt, such as a refused login.
    pub fn note_error(&self, reason: impl Into<String>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of a task, safe to hand out to callers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub target: String,
    pub credential_count: usize,
    pub message_count: usize,
    #[serde(with = "interval_secs")]
    pub interval: Duration,
    pub started_at: DateTime<Local>,
    pub status: TaskStatus,
    pub attempts: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Registry entry owned by the job manager. The send loop only shares the
/// cancel signal and the stats counters.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub target: String,
    pub credential_count: usize,
    pub message_count: usize,
    pub interval: Duration,
    pub started_at: DateTime<Local>,
    pub status: TaskStatus,
    pub cancel: Arc<CancelSignal>,
    pub stats: Arc<TaskStats>,
    pub handle: Option<JoinHandle<()>>,
    /// Disconnects when the loop thread exits.
    pub exited: Receiver<()>,
}

impl Task {
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id.clone(),
            target: self.target.clone(),
            credential_count: self.credential_count,
            message_count: self.message_count,
            interval: self.interval,
            started_at: self.started_at,
            status: self.status,
            attempts: self.stats.attempts(),
            failures: self.stats.failures(),
            last_error: self.stats.last_error(),
        }
    }
}

mod interval_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(interval: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(interval.as_secs_f64())
    }
}
