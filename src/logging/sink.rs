//! Bounded, append-only event buffer shared by every send loop and viewer.
//!
//! Offsets handed out by [`LogSink::snapshot_from`] are sequence numbers, not
//! buffer indices, so eviction never shifts a reader's position. A reader that
//! falls more than `capacity` events behind resumes at the oldest retained
//! event: the evicted ones are skipped, never repeated.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::Local;
use log::log;

use crate::models::{
    event::{LogEvent, Severity},
    task::TaskId,
};

pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Default)]
struct SinkState {
    events: VecDeque<LogEvent>,
    next_seq: u64,
}

impl SinkState {
    fn read_from(&self, offset: u64) -> (Vec<LogEvent>, u64) {
        let first = self.events.front().map_or(self.next_seq, |event| event.seq);
        let skip = offset.saturating_sub(first);
        let events = self
            .events
            .iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        (events, self.next_seq)
    }
}

#[derive(Debug)]
pub struct LogSink {
    state: Mutex<SinkState>,
    appended: Condvar,
    capacity: usize,
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        LogSink {
            state: Mutex::new(SinkState {
                events: VecDeque::with_capacity(capacity.max(1)),
                next_seq: 0,
            }),
            appended: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one event and returns its sequence number.
    pub fn append(
        &self,
        task_id: Option<&TaskId>,
        severity: Severity,
        message: impl Into<String>,
    ) -> u64 {
        let message = message.into();
        match task_id {
            Some(id) => log!(severity.level(), "[{}] {}", id, message),
            None => log!(severity.level(), "{}", message),
        }

        let mut state = self.lock();
        let seq = state.next_seq;
        state.events.push_back(LogEvent {
            seq,
            task_id: task_id.cloned(),
            severity,
            message,
            timestamp: Local::now(),
        });
        state.next_seq += 1;
        while state.events.len() > self.capacity {
            state.events.pop_front();
        }
        drop(state);

        self.appended.notify_all();
        seq
    }

    pub fn info(&self, task_id: Option<&TaskId>, message: impl Into<String>) -> u64 {
        self.append(task_id, Severity::Info, message)
    }

    pub fn error(&self, task_id: Option<&TaskId>, message: impl Into<String>) -> u64 {
        self.append(task_id, Severity::Error, message)
    }

    /// Events appended at or after `offset`, plus the offset for the next call.
    pub fn snapshot_from(&self, offset: u64) -> (Vec<LogEvent>, u64) {
        self.lock().read_from(offset)
    }

    /// Like [`snapshot_from`](Self::snapshot_from), but waits up to `timeout`
    /// for something newer than `offset` to arrive.
    pub fn wait_from(&self, offset: u64, timeout: Duration) -> (Vec<LogEvent>, u64) {
        let state = self.lock();
        let (state, _) = self
            .appended
            .wait_timeout_while(state, timeout, |state| state.next_seq <= offset)
            .unwrap_or_else(PoisonError::into_inner);
        state.read_from(offset)
    }

    pub fn all(&self) -> Vec<LogEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Offset just past the newest event.
    pub fn tail(&self) -> u64 {
        self.lock().next_seq
    }

    /// Offset of the oldest retained event.
    pub fn head(&self) -> u64 {
        let state = self.lock();
        state.events.front().map_or(state.next_seq, |event| event.seq)
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LogSink {
    fn default() -> Self {
        LogSink::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Instant};

    use super::*;

    fn messages(events: &[LogEvent]) -> Vec<String> {
        events.iter().map(|event| event.message.clone()).collect()
    }

    #[test]
    fn overflow_keeps_most_recent_in_order() {
        let sink = LogSink::new(5);
        for i in 0..12 {
            sink.info(None, format!("line {i}"));
        }
        assert_eq!(sink.len(), sink.capacity());
        assert_eq!(
            messages(&sink.all()),
            vec!["line 7", "line 8", "line 9", "line 10", "line 11"]
        );
        assert_eq!(sink.head(), 7);
        assert_eq!(sink.tail(), 12);
    }

    #[test]
    fn snapshot_returns_only_new_events() {
        let sink = LogSink::new(10);
        sink.info(None, "a");
        sink.info(None, "b");
        let (events, offset) = sink.snapshot_from(0);
        assert_eq!(messages(&events), vec!["a", "b"]);
        assert_eq!(offset, 2);

        let (events, same) = sink.snapshot_from(offset);
        assert!(events.is_empty());
        assert_eq!(same, offset);

        sink.error(None, "c");
        let (events, offset) = sink.snapshot_from(offset);
        assert_eq!(messages(&events), vec!["c"]);
        assert_eq!(events[0].severity, Severity::Error);
        assert_eq!(offset, 3);
    }

    #[test]
    fn evicted_offsets_jump_forward() {
        let sink = LogSink::new(3);
        for i in 0..3 {
            sink.info(None, format!("{i}"));
        }
        let (_, offset) = sink.snapshot_from(0);
        for i in 3..8 {
            sink.info(None, format!("{i}"));
        }
        // 3 and 4 were evicted before the reader came back.
        let (events, offset) = sink.snapshot_from(offset);
        assert_eq!(messages(&events), vec!["5", "6", "7"]);
        assert_eq!(offset, 8);
    }

    #[test]
    fn offsets_past_the_tail_read_nothing() {
        let sink = LogSink::new(3);
        sink.info(None, "only");
        let (events, offset) = sink.snapshot_from(40);
        assert!(events.is_empty());
        assert_eq!(offset, 1);
    }

    #[test]
    fn events_keep_their_task_id() {
        let sink = LogSink::new(3);
        let id = TaskId::from("abc123");
        sink.append(Some(&id), Severity::Success, "sent");
        let event = &sink.all()[0];
        assert_eq!(event.task_id.as_ref(), Some(&id));
        assert!(event.to_string().contains("[abc123] OK sent"));

        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["severity"], "success");
        assert_eq!(json["task_id"], "abc123");
        assert_eq!(json["seq"], 0);
    }

    #[test]
    fn wait_wakes_on_append() {
        let sink = Arc::new(LogSink::new(10));
        let writer = Arc::clone(&sink);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            writer.info(None, "late");
        });

        let started = Instant::now();
        let (events, offset) = sink.wait_from(0, Duration::from_secs(5));
        assert_eq!(messages(&events), vec!["late"]);
        assert_eq!(offset, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn wait_times_out_empty() {
        let sink = LogSink::new(10);
        let (events, offset) = sink.wait_from(0, Duration::from_millis(20));
        assert!(events.is_empty());
        assert_eq!(offset, 0);
    }

    #[test]
    fn concurrent_writers_never_exceed_capacity_or_tear() {
        let sink = Arc::new(LogSink::new(50));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for i in 0..200 {
                        sink.info(None, format!("w{w}-{i}"));
                    }
                })
            })
            .collect();

        let mut offset = 0;
        let mut last_seq = None;
        while writers.iter().any(|w| !w.is_finished()) {
            let (events, next) = sink.snapshot_from(offset);
            for event in &events {
                assert!(last_seq.map_or(true, |last| event.seq > last));
                last_seq = Some(event.seq);
            }
            assert!(sink.len() <= 50);
            offset = next;
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(sink.len(), 50);
        assert_eq!(sink.tail(), 800);
    }
}
