use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use log::debug;
use serde_json::json;

use super::sink::LogSink;
use crate::models::event::LogEvent;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Hands out independent read cursors over a shared [`LogSink`].
#[derive(Debug, Clone)]
pub struct StreamPublisher {
    sink: Arc<LogSink>,
    poll_interval: Duration,
}

impl StreamPublisher {
    pub fn new(sink: Arc<LogSink>, poll_interval: Duration) -> Self {
        StreamPublisher {
            sink,
            poll_interval,
        }
    }

    /// Cursor positioned at the current tail: only events appended from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            sink: Arc::clone(&self.sink),
            offset: self.sink.tail(),
        }
    }

    /// Cursor that replays everything still retained before going live.
    pub fn subscribe_with_history(&self) -> Subscription {
        Subscription {
            sink: Arc::clone(&self.sink),
            offset: self.sink.head(),
        }
    }

    /// Pushes events from `subscription` into a channel on a background thread
    /// until the returned feed is dropped.
    pub fn feed(&self, mut subscription: Subscription) -> io::Result<LiveFeed> {
        let (tx, rx) = unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let thread_closed = Arc::clone(&closed);
        let poll_interval = self.poll_interval;

        thread::Builder::new()
            .name("log-feed".to_string())
            .spawn(move || {
                while !thread_closed.load(Ordering::Acquire) {
                    for event in subscription.wait(poll_interval) {
                        if tx.send(event).is_err() {
                            debug!("Viewer went away, closing feed.");
                            return;
                        }
                    }
                }
            })?;

        Ok(LiveFeed { events: rx, closed })
    }
}

/// One viewer's read position.
#[derive(Debug)]
pub struct Subscription {
    sink: Arc<LogSink>,
    offset: u64,
}

impl Subscription {
    /// Everything new since the last call, without blocking.
    pub fn poll(&mut self) -> Vec<LogEvent> {
        let (events, offset) = self.sink.snapshot_from(self.offset);
        self.offset = offset;
        events
    }

    /// Everything new since the last call, waiting up to `timeout` if nothing is.
    pub fn wait(&mut self, timeout: Duration) -> Vec<LogEvent> {
        let (events, offset) = self.sink.wait_from(self.offset, timeout);
        self.offset = offset;
        events
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Push side of a subscription. Dropping it stops the forwarding thread within
/// one poll interval.
#[derive(Debug)]
pub struct LiveFeed {
    events: Receiver<LogEvent>,
    closed: Arc<AtomicBool>,
}

impl LiveFeed {
    pub fn recv_timeout(&self, timeout: Duration) -> Option<LogEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_iter(&self) -> impl Iterator<Item = LogEvent> + '_ {
        self.events.try_iter()
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Server-sent-events frame for one event.
pub fn sse_frame(event: &LogEvent) -> String {
    format!("data: {}\n\n", json!({ "line": event.to_string() }))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn publisher(capacity: usize) -> (Arc<LogSink>, StreamPublisher) {
        let sink = Arc::new(LogSink::new(capacity));
        let publisher = StreamPublisher::new(Arc::clone(&sink), Duration::from_millis(20));
        (sink, publisher)
    }

    #[test]
    fn new_viewers_start_at_the_tail() {
        let (sink, publisher) = publisher(10);
        sink.info(None, "before");
        let mut live = publisher.subscribe();
        let mut replay = publisher.subscribe_with_history();
        assert_eq!(live.offset(), 1);
        assert_eq!(replay.offset(), 0);
        sink.info(None, "after");

        let live: Vec<_> = live.poll().into_iter().map(|e| e.message).collect();
        let replay: Vec<_> = replay.poll().into_iter().map(|e| e.message).collect();
        assert_eq!(live, vec!["after"]);
        assert_eq!(replay, vec!["before", "after"]);
    }

    #[test]
    fn viewers_subscribed_at_different_times_see_their_own_suffix() {
        let (sink, publisher) = publisher(100);
        let mut early = publisher.subscribe();
        sink.info(None, "one");
        sink.info(None, "two");
        let mut late = publisher.subscribe();
        sink.info(None, "three");

        let mut early_seen = early.poll();
        early_seen.extend(early.poll());
        sink.info(None, "four");
        early_seen.extend(early.poll());
        let late_seen = late.poll();

        let early_seen: Vec<_> = early_seen.into_iter().map(|e| e.message).collect();
        let late_seen: Vec<_> = late_seen.into_iter().map(|e| e.message).collect();
        assert_eq!(early_seen, vec!["one", "two", "three", "four"]);
        assert_eq!(late_seen, vec!["three", "four"]);
        // Reading never consumes anything from the sink.
        assert_eq!(sink.len(), 4);
    }

    #[test]
    fn live_feed_delivers_in_order() {
        let (sink, publisher) = publisher(100);
        let feed = publisher.feed(publisher.subscribe()).unwrap();
        for i in 0..5 {
            sink.info(None, format!("event {i}"));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while seen.len() < 5 && Instant::now() < deadline {
            if let Some(event) = feed.recv_timeout(Duration::from_millis(100)) {
                seen.push(event.message);
            }
        }
        assert_eq!(seen, (0..5).map(|i| format!("event {i}")).collect::<Vec<_>>());
    }

    #[test]
    fn dropping_one_feed_leaves_others_running() {
        let (sink, publisher) = publisher(100);
        let first = publisher.feed(publisher.subscribe()).unwrap();
        let second = publisher.feed(publisher.subscribe()).unwrap();
        drop(first);
        sink.info(None, "still here");
        let event = second.recv_timeout(Duration::from_secs(5));
        assert_eq!(event.map(|e| e.message).as_deref(), Some("still here"));
    }

    #[test]
    fn sse_frames_wrap_the_rendered_line() {
        let (sink, _) = publisher(10);
        sink.info(None, "hello \"world\"");
        let frame = sse_frame(&sink.all()[0]);
        assert!(frame.starts_with("data: {\"line\":\"["));
        assert!(frame.contains("hello \\\"world\\\""));
        assert!(frame.ends_with("}\n\n"));
    }
}
