use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{error, info, warn};

use crate::{
    endpoint::MessagingEndpoint,
    error::StartError,
    logging::sink::LogSink,
    models::{
        message::TaskMessage,
        task::{Task, TaskId, TaskInfo, TaskStats, TaskStatus},
    },
    worker::worker::{CancelSignal, SendLoop},
};

type Registry = Arc<Mutex<HashMap<TaskId, Task>>>;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a stop waits for a loop to exit before forgetting it.
    pub stop_timeout: Duration,
    /// Label put in front of every outbound message.
    pub message_prefix: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            stop_timeout: Duration::from_secs(5),
            message_prefix: String::new(),
        }
    }
}

/// Owns every running send loop.
///
/// Registry mutations (insert on start, status changes, removal) each happen
/// under one lock acquisition, so [`list`](Self::list) never sees a task half
/// built or half torn down. Waiting for a loop to exit happens outside the
/// lock; during that window the task is listed as `Stopping`.
pub struct JobManager {
    tasks: Registry,
    sink: Arc<LogSink>,
    endpoint: Arc<dyn MessagingEndpoint>,
    reports: Sender<TaskMessage>,
    config: ManagerConfig,
    supervisor: Option<JoinHandle<()>>,
    /// Loops forgotten after a stop timed out; they may still be running.
    detached: AtomicUsize,
}

enum Lookup {
    Missing,
    AlreadyStopping,
    Found(Stopping),
}

/// A task pulled out of `running` state by a stop request, waiting to be joined.
struct Stopping {
    id: TaskId,
    handle: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl JobManager {
    pub fn new(
        config: ManagerConfig,
        endpoint: Arc<dyn MessagingEndpoint>,
        sink: Arc<LogSink>,
    ) -> Self {
        let tasks: Registry = Arc::new(Mutex::new(HashMap::new()));
        let (reports, receiver) = unbounded();
        let supervisor = spawn_supervisor(receiver, Arc::clone(&tasks), Arc::clone(&sink));

        JobManager {
            tasks,
            sink,
            endpoint,
            reports,
            config,
            supervisor,
            detached: AtomicUsize::new(0),
        }
    }

    pub fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }

    /// Validates the inputs and spawns a send loop for them.
    ///
    /// Rejections leave the registry untouched and write one line to the sink.
    pub fn start(
        &self,
        credentials: Vec<String>,
        target: &str,
        messages: Vec<String>,
        interval: Duration,
    ) -> Result<TaskId, StartError> {
        let target = target.trim();
        let rejection = if credentials.is_empty() {
            Some(StartError::MissingCredentials)
        } else if messages.is_empty() {
            Some(StartError::EmptyMessages)
        } else if target.is_empty() {
            Some(StartError::MissingTarget)
        } else if interval.is_zero() {
            Some(StartError::InvalidInterval)
        } else {
            None
        };
        if let Some(err) = rejection {
            self.sink.error(None, format!("Start rejected: {err}."));
            return Err(err);
        }

        let mut tasks = self.lock();
        let id = loop {
            let candidate = TaskId::random();
            if !tasks.contains_key(&candidate) {
                break candidate;
            }
        };

        let cancel = Arc::new(CancelSignal::new());
        let stats = Arc::new(TaskStats::default());
        let credential_count = credentials.len();
        let message_count = messages.len();

        let send_loop = SendLoop {
            task_id: id.clone(),
            target: target.to_string(),
            credentials,
            messages,
            interval,
            prefix: self.config.message_prefix.clone(),
            endpoint: Arc::clone(&self.endpoint),
            sink: Arc::clone(&self.sink),
            cancel: Arc::clone(&cancel),
            stats: Arc::clone(&stats),
            reports: self.reports.clone(),
        };
        let (handle, exited) = match send_loop.spawn() {
            Ok(spawned) => spawned,
            Err(e) => {
                drop(tasks);
                self.sink.error(None, format!("Could not start task: {e}."));
                return Err(StartError::Spawn(e));
            }
        };

        tasks.insert(
            id.clone(),
            Task {
                id: id.clone(),
                target: target.to_string(),
                credential_count,
                message_count,
                interval,
                started_at: Local::now(),
                status: TaskStatus::Created,
                cancel,
                stats,
                handle: Some(handle),
                exited,
            },
        );
        drop(tasks);

        self.sink.info(
            Some(&id),
            format!("Task {id} started for target {target}."),
        );
        Ok(id)
    }

    /// Stops one task. Returns `false` (and logs why) if there was nothing to stop.
    pub fn stop_one(&self, id: &TaskId) -> bool {
        let lookup = {
            let mut tasks = self.lock();
            match tasks.get_mut(id) {
                None => Lookup::Missing,
                Some(task) if task.status == TaskStatus::Stopping => Lookup::AlreadyStopping,
                Some(task) => Lookup::Found(begin_stop(task)),
            }
        };

        let stopping = match lookup {
            Lookup::Found(stopping) => stopping,
            Lookup::AlreadyStopping => {
                self.sink
                    .info(Some(id), format!("Task {id} is already stopping."));
                return false;
            }
            Lookup::Missing => {
                self.sink
                    .error(None, format!("Stop requested for unknown task id '{id}'."));
                return false;
            }
        };

        self.sink.info(Some(id), format!("Stop requested for task {id}."));
        let deadline = Instant::now() + self.config.stop_timeout;
        if !self.finish_stop(stopping, deadline) {
            self.detached.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Stops every active task and returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let stopping: Vec<Stopping> = {
            let mut tasks = self.lock();
            tasks
                .values_mut()
                .filter(|task| task.status != TaskStatus::Stopping)
                .map(begin_stop)
                .collect()
        };

        if stopping.is_empty() {
            self.sink.info(None, "Stop-all requested but no task is running.");
            return 0;
        }

        self.sink
            .info(None, format!("Stopping {} task(s).", stopping.len()));
        let deadline = Instant::now() + self.config.stop_timeout;
        let count = stopping.len();
        let mut detached = 0;
        for task in stopping {
            if !self.finish_stop(task, deadline) {
                detached += 1;
            }
        }
        self.detached.fetch_add(detached, Ordering::Relaxed);
        count
    }

    /// Snapshot of all tasks, oldest first.
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = self.lock().values().map(Task::info).collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        infos
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.lock().get(id).map(|task| task.status)
    }

    /// Stops everything and waits for the supervisor to drain, unless some
    /// loop was detached and may still report in.
    pub fn shutdown(mut self) {
        self.stop_all();
        if self.detached.load(Ordering::Relaxed) > 0 {
            warn!("Some send loops were detached; not waiting for the supervisor.");
            return;
        }
        // The supervisor exits once every sender is gone: ours and the loops'.
        let (closed, _) = unbounded();
        drop(std::mem::replace(&mut self.reports, closed));
        if let Some(handle) = self.supervisor.take() {
            if handle.join().is_err() {
                error!("Task supervisor panicked.");
            }
        }
    }

    /// Waits for the loop to exit and forgets the task. Returns `false` if the
    /// loop had to be detached.
    fn finish_stop(&self, stopping: Stopping, deadline: Instant) -> bool {
        let Stopping { id, handle, exited } = stopping;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let exited = match exited.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Task {} did not exit within {:?}; leaving it to finish in the background.",
                    id, self.config.stop_timeout
                );
                self.sink.error(
                    Some(&id),
                    format!("Task {id} did not exit in time and was detached."),
                );
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = handle {
                    if handle.join().is_err() {
                        error!("Send loop for task {} panicked.", id);
                    }
                }
                true
            }
        };

        self.lock().remove(&id);
        info!("Task status updated {}: {:?}", id, TaskStatus::Stopped);
        self.sink.info(Some(&id), format!("Task {id} stopped."));
        exited
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        for task in self.lock().values() {
            task.cancel.cancel();
        }
        // Loops hold report senders until they exit; don't block on them here.
        self.supervisor.take();
    }
}

fn begin_stop(task: &mut Task) -> Stopping {
    task.status = TaskStatus::Stopping;
    task.cancel.cancel();
    Stopping {
        id: task.id.clone(),
        handle: task.handle.take(),
        exited: task.exited.clone(),
    }
}

/// Consumes lifecycle reports from send loops: promotes tasks to `Running`
/// and reaps loops that ended on their own.
fn spawn_supervisor(
    receiver: Receiver<TaskMessage>,
    tasks: Registry,
    sink: Arc<LogSink>,
) -> Option<JoinHandle<()>> {
    let spawned = thread::Builder::new()
        .name("task-supervisor".to_string())
        .spawn(move || {
            for message in receiver.iter() {
                match message {
                    TaskMessage::UpdateStatus(id, status) => {
                        handle_status_update(&id, status, &tasks)
                    }
                    TaskMessage::Finished(id) => handle_finished(&id, &tasks, &sink),
                }
            }
            info!("Task supervisor exiting.");
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            // Without a supervisor, status stays `Created` and self-finished
            // tasks linger until stopped; everything else still works.
            error!("Failed to spawn task supervisor: {}", e);
            None
        }
    }
}

fn handle_status_update(id: &TaskId, status: TaskStatus, tasks: &Registry) {
    let mut tasks = tasks.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(task) = tasks.get_mut(id) {
        if task.status == TaskStatus::Stopping {
            return;
        }
        task.status = status;
        info!("Task status updated {}: {:?}", id, status);
    }
}

fn handle_finished(id: &TaskId, tasks: &Registry, sink: &LogSink) {
    let task = {
        let mut tasks = tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.get(id).map(|task| task.status) {
            // A stop in progress owns the teardown.
            Some(TaskStatus::Stopping) => return,
            Some(_) => tasks.remove(id),
            None => None,
        }
    };

    if let Some(mut task) = task {
        task.status = TaskStatus::Finished;
        if let Some(handle) = task.handle.take() {
            if handle.join().is_err() {
                error!("Send loop for task {} panicked.", id);
            }
        }
        sink.info(Some(id), format!("Task {id} finished and was removed."));
    }
}
