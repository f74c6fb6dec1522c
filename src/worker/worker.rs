use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};

use crate::{
    endpoint::MessagingEndpoint,
    logging::sink::LogSink,
    models::{
        event::Severity,
        message::TaskMessage,
        task::{TaskId, TaskStats, TaskStatus},
    },
};

/// Cooperative stop flag for one send loop.
///
/// The loop checks it before every send, and the interval sleep wakes up as
/// soon as it is set, so a stop takes effect after at most one in-flight
/// remote call.
#[derive(Debug)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        CancelSignal {
            cancelled: AtomicBool::new(false),
            wake_tx: Mutex::new(Some(tx)),
            wake_rx: rx,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // Dropping the only sender disconnects every sleeper.
        self.wake_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleeps for `duration` unless cancelled first. Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.wake_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        CancelSignal::new()
    }
}

/// Everything one task's send loop needs. Built by the job manager and moved
/// onto the loop's thread.
pub struct SendLoop {
    pub task_id: TaskId,
    pub target: String,
    pub credentials: Vec<String>,
    pub messages: Vec<String>,
    pub interval: Duration,
    pub prefix: String,
    pub endpoint: Arc<dyn MessagingEndpoint>,
    pub sink: Arc<LogSink>,
    pub cancel: Arc<CancelSignal>,
    pub stats: Arc<TaskStats>,
    pub reports: Sender<TaskMessage>,
}

enum Exit {
    Cancelled,
    SetupFailed,
}

impl SendLoop {
    /// Starts the loop on its own thread. The returned receiver disconnects
    /// once the thread has exited, which lets the caller wait with a timeout.
    pub fn spawn(self) -> io::Result<(JoinHandle<()>, Receiver<()>)> {
        let (exited_tx, exited_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(format!("send-{}", self.task_id))
            .spawn(move || {
                let _exited = exited_tx;
                self.run();
            })?;
        Ok((handle, exited_rx))
    }

    pub fn run(self) {
        let id = self.task_id.clone();
        self.sink.info(
            Some(&id),
            format!(
                "Worker started: target {}, {} credential(s), {} message(s), every {:?}.",
                self.target,
                self.credentials.len(),
                self.messages.len(),
                self.interval
            ),
        );

        let sessions = self.login_all();
        let exit = if self.cancel.is_cancelled() {
            Exit::Cancelled
        } else if sessions.is_empty() {
            self.sink.error(
                Some(&id),
                "No credential could log in; nothing will be sent.",
            );
            Exit::SetupFailed
        } else {
            self.report(TaskMessage::UpdateStatus(id.clone(), TaskStatus::Running));
            self.send_cycles(&sessions)
        };

        for (number, credential) in &sessions {
            if let Err(e) = self.endpoint.logout(credential) {
                debug!("[{}] logout of credential #{} failed: {}", id, number, e);
            }
        }

        match exit {
            Exit::Cancelled => {
                self.sink.info(Some(&id), "Worker stopped.");
            }
            Exit::SetupFailed => {
                self.sink.info(Some(&id), "Worker finished.");
                self.report(TaskMessage::Finished(id));
            }
        }
    }

    /// Credentials that logged in, paired with their 1-based position in the upload.
    fn login_all(&self) -> Vec<(usize, &str)> {
        let mut sessions = Vec::with_capacity(self.credentials.len());
        for (index, credential) in self.credentials.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let number = index + 1;
            match self.endpoint.login(credential) {
                Ok(()) => sessions.push((number, credential.as_str())),
                Err(e) => {
                    self.stats.note_error(e.to_string());
                    self.sink.error(
                        Some(&self.task_id),
                        format!("Login failed for credential #{number}: {e}"),
                    );
                }
            }
        }
        if !sessions.is_empty() {
            self.sink.info(
                Some(&self.task_id),
                format!("{} of {} credential(s) logged in.", sessions.len(), self.credentials.len()),
            );
        }
        sessions
    }

    fn send_cycles(&self, sessions: &[(usize, &str)]) -> Exit {
        let id = &self.task_id;
        let mut cycle: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Exit::Cancelled;
            }
            cycle += 1;
            info!("[{}] starting cycle {}", id, cycle);

            for (index, message) in self.messages.iter().enumerate() {
                for (number, credential) in sessions {
                    if self.cancel.is_cancelled() {
                        return Exit::Cancelled;
                    }
                    let body = compose(&self.prefix, message);
                    match self.endpoint.send(&self.target, credential, &body) {
                        Ok(()) => {
                            self.stats.record_success();
                            self.sink.append(
                                Some(id),
                                Severity::Success,
                                format!(
                                    "Cycle {cycle}: message {} sent to {} with credential #{number}.",
                                    index + 1,
                                    self.target
                                ),
                            );
                        }
                        Err(e) => {
                            self.stats.record_failure(e.to_string());
                            self.sink.append(
                                Some(id),
                                Severity::Error,
                                format!(
                                    "Cycle {cycle}: message {} to {} with credential #{number} failed: {e}",
                                    index + 1,
                                    self.target
                                ),
                            );
                        }
                    }
                    if self.cancel.sleep(self.interval) {
                        return Exit::Cancelled;
                    }
                }
            }
        }
    }

    fn report(&self, message: TaskMessage) {
        if self.reports.send(message).is_err() {
            debug!("[{}] supervisor is gone, dropping report", self.task_id);
        }
    }
}

/// Outbound text: the configured label, then the message line.
pub fn compose(prefix: &str, body: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        body.to_string()
    } else {
        format!("{prefix} {body}")
    }
}
