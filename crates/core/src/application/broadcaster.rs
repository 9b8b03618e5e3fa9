// Log Broadcaster - per-execution fan-out of captured output
//
// Every subscriber owns a bounded mpsc channel. Lines are pushed with
// `try_send` while the execution's lock is held, so sequence assignment and
// delivery order are the same for everyone and the capture loop never waits on
// a consumer. Each channel keeps one slot beyond the line capacity for the
// terminal marker. Overflow policy: a subscriber with no room for another
// line is disconnected; its stream ends without a terminal marker.

use crate::domain::{
    DomainError, ExecutionId, ExecutionOutcome, ExecutionState, LogEvent, LogLine,
};
use crate::error::{AppError, Result};
use crate::port::{OutputSink, TimeProvider};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Default per-subscriber buffer (events)
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

/// Stream of log events for one execution
///
/// Yields lines in sequence order, then the terminal marker, then `None`.
pub struct LogSubscription {
    execution_id: ExecutionId,
    rx: mpsc::Receiver<LogEvent>,
}

impl LogSubscription {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Receive the next event, waiting if necessary
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain the stream until it closes
    pub async fn collect_all(mut self) -> Vec<LogEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl futures::Stream for LogSubscription {
    type Item = LogEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LogEvent>> {
        self.rx.poll_recv(cx)
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<LogEvent>,
}

struct LogInner {
    next_seq: u64,
    next_subscriber_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Output log of a single execution
pub struct ExecutionLog {
    execution_id: ExecutionId,
    capacity: usize,
    time_provider: Arc<dyn TimeProvider>,
    inner: Mutex<LogInner>,
    state: watch::Sender<ExecutionState>,
    disconnected: AtomicU64,
}

impl ExecutionLog {
    fn new(
        execution_id: ExecutionId,
        capacity: usize,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let (state, _) = watch::channel(ExecutionState::Running);
        Self {
            execution_id,
            capacity: capacity.max(1),
            time_provider,
            inner: Mutex::new(LogInner {
                next_seq: 0,
                next_subscriber_id: 0,
                subscribers: Vec::new(),
            }),
            state,
            disconnected: AtomicU64::new(0),
        }
    }

    // A panic while holding the lock leaves the vectors consistent, so keep going
    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Attach a subscriber that sees every line published from now on
    ///
    /// Attaching after termination yields just the terminal marker.
    pub fn subscribe(&self) -> LogSubscription {
        let mut inner = self.lock();

        if let Some(outcome) = self.state.borrow().outcome() {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.try_send(LogEvent::Terminal(outcome.clone()));
            return LogSubscription {
                execution_id: self.execution_id.clone(),
                rx,
            };
        }

        let (tx, rx) = mpsc::channel(self.capacity + 1);
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.push(Subscriber { id, tx });
        debug!(
            execution_id = %self.execution_id,
            subscriber = id,
            from_seq = inner.next_seq,
            "Subscriber attached"
        );

        LogSubscription {
            execution_id: self.execution_id.clone(),
            rx,
        }
    }

    /// Assign the next sequence number and push the line to all subscribers
    ///
    /// Returns `None` (and drops the line) once the log is terminated.
    pub fn publish(&self, text: String) -> Option<LogLine> {
        let mut inner = self.lock();
        if self.state.borrow().is_terminal() {
            debug!(execution_id = %self.execution_id, "Dropping line published after termination");
            return None;
        }

        let line = LogLine {
            seq: inner.next_seq,
            text,
            emitted_at: self.time_provider.now_millis(),
        };
        inner.next_seq += 1;

        let execution_id = &self.execution_id;
        let disconnected = &self.disconnected;
        inner.subscribers.retain(|subscriber| {
            if subscriber.tx.is_closed() {
                debug!(
                    execution_id = %execution_id,
                    subscriber = subscriber.id,
                    "Subscriber went away"
                );
                return false;
            }
            // The last free slot belongs to the terminal marker
            if subscriber.tx.capacity() < 2 {
                warn!(
                    execution_id = %execution_id,
                    subscriber = subscriber.id,
                    seq = line.seq,
                    "Subscriber buffer full, disconnecting"
                );
                disconnected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            subscriber.tx.try_send(LogEvent::Line(line.clone())).is_ok()
        });

        Some(line)
    }

    /// Move to the terminal state, send the marker and close every stream
    pub fn close(&self, outcome: ExecutionOutcome) -> std::result::Result<(), DomainError> {
        let mut inner = self.lock();

        let mut state = self.state.borrow().clone();
        state.terminate(outcome.clone())?;

        for subscriber in inner.subscribers.drain(..) {
            if subscriber
                .tx
                .try_send(LogEvent::Terminal(outcome.clone()))
                .is_err()
            {
                warn!(
                    execution_id = %self.execution_id,
                    subscriber = subscriber.id,
                    "Could not deliver terminal marker"
                );
            }
        }
        self.state.send_replace(state);
        Ok(())
    }

    pub fn state(&self) -> ExecutionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on the Running -> Terminated transition
    pub fn watch_state(&self) -> watch::Receiver<ExecutionState> {
        self.state.subscribe()
    }

    pub fn lines_published(&self) -> u64 {
        self.lock().next_seq
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Subscribers dropped by the overflow policy so far
    pub fn disconnected_count(&self) -> u64 {
        self.disconnected.load(Ordering::Relaxed)
    }
}

impl OutputSink for ExecutionLog {
    fn emit(&self, text: String) {
        self.publish(text);
    }
}

/// Registry of live execution logs
pub struct LogBroadcaster {
    capacity: usize,
    time_provider: Arc<dyn TimeProvider>,
    logs: Mutex<HashMap<ExecutionId, Arc<ExecutionLog>>>,
}

impl LogBroadcaster {
    /// Create a broadcaster whose subscribers buffer up to `capacity` events
    pub fn new(time_provider: Arc<dyn TimeProvider>, capacity: usize) -> Self {
        Self {
            capacity,
            time_provider,
            logs: Mutex::new(HashMap::new()),
        }
    }

    fn logs(&self) -> MutexGuard<'_, HashMap<ExecutionId, Arc<ExecutionLog>>> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the log of a new execution
    pub fn open(&self, execution_id: &str) -> Arc<ExecutionLog> {
        let log = Arc::new(ExecutionLog::new(
            execution_id.to_string(),
            self.capacity,
            self.time_provider.clone(),
        ));
        self.logs().insert(execution_id.to_string(), log.clone());
        log
    }

    /// Attach to a live execution by ID
    ///
    /// # Errors
    /// `AppError::NotFound` once the execution has terminated and been reaped
    pub fn subscribe(&self, execution_id: &str) -> Result<LogSubscription> {
        let log = self
            .logs()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", execution_id)))?;
        Ok(log.subscribe())
    }

    /// Terminate an execution's log and forget it
    pub fn finish(&self, execution_id: &str, outcome: ExecutionOutcome) -> Result<()> {
        let log = self
            .logs()
            .remove(execution_id)
            .ok_or_else(|| AppError::NotFound(format!("Execution {} not found", execution_id)))?;
        log.close(outcome)?;
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.logs().len()
    }
}
