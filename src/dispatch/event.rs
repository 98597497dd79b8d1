//! Command completion events.

use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static EVENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    Error(String),
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Error(_))
    }
}

/// What produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    NdRangeKernel,
    Task,
    ReadBuffer,
    ReadBufferRect,
    WriteBuffer,
    CopyBuffer,
    ReadImage,
    WriteImage,
    User,
}

/// Device-clock timestamps of a command, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfilingInfo {
    pub queued: u64,
    pub submit: u64,
    pub start: u64,
    pub end: u64,
}

impl ProfilingInfo {
    /// Execution time, `end - start`.
    pub fn elapsed_ns(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

struct EventState {
    status: EventStatus,
    times: ProfilingInfo,
    subscribers: Vec<Sender<EventStatus>>,
}

struct EventInner {
    id: u64,
    command: CommandType,
    context_id: u64,
    profiling: bool,
    epoch: Instant,
    state: Mutex<EventState>,
    done: Condvar,
}

/// Completion marker of one command. Clones observe the same command.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn new(
        command: CommandType,
        context_id: u64,
        epoch: Instant,
        profiling: bool,
        initial: EventStatus,
    ) -> Self {
        let now = epoch.elapsed().as_nanos() as u64;
        Self {
            inner: Arc::new(EventInner {
                id: EVENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                command,
                context_id,
                profiling,
                epoch,
                state: Mutex::new(EventState {
                    status: initial,
                    times: ProfilingInfo {
                        queued: now,
                        submit: now,
                        start: 0,
                        end: 0,
                    },
                    subscribers: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn command_type(&self) -> CommandType {
        self.inner.command
    }

    pub fn status(&self) -> EventStatus {
        self.inner.state.lock().status.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().status.is_terminal()
    }

    /// Block until the command reaches a terminal state.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            self.inner.done.wait(&mut state);
        }
        match &state.status {
            EventStatus::Error(msg) => Err(Error::dispatch(msg.clone())),
            _ => Ok(()),
        }
    }

    /// Wait for every event; reports the first failure in list order.
    pub fn wait_all(events: &[Event]) -> Result<()> {
        let mut first = None;
        for event in events {
            if let Err(e) = event.wait() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Receiver that yields the terminal status exactly once.
    pub fn completion(&self) -> Receiver<EventStatus> {
        let (tx, rx) = bounded(1);
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            let _ = tx.send(state.status.clone());
        } else {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Timestamps of a completed command on a profiling queue.
    pub fn profiling_info(&self) -> Result<ProfilingInfo> {
        if !self.inner.profiling {
            return Err(Error::dispatch(
                "profiling was not enabled on the queue that issued this event",
            ));
        }
        let state = self.inner.state.lock();
        match state.status {
            EventStatus::Complete => Ok(state.times),
            _ => Err(Error::dispatch("profiling info is only available once the command completes")),
        }
    }

    pub(crate) fn context_id(&self) -> u64 {
        self.inner.context_id
    }

    fn now(&self) -> u64 {
        self.inner.epoch.elapsed().as_nanos() as u64
    }

    // Timestamps are taken under the state lock so they stay ordered.
    pub(crate) fn mark_submitted(&self) {
        let mut state = self.inner.state.lock();
        if state.status == EventStatus::Queued {
            state.status = EventStatus::Submitted;
            state.times.submit = self.now();
        }
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.inner.state.lock();
        if !state.status.is_terminal() {
            state.status = EventStatus::Running;
            state.times.start = self.now();
        }
    }

    /// Move to a terminal state. Returns false if the event had already
    /// finished.
    pub(crate) fn finish(&self, outcome: std::result::Result<(), String>) -> bool {
        let subscribers = {
            let mut state = self.inner.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            let now = self.now();
            if state.times.start == 0 {
                state.times.start = now;
            }
            state.times.end = now.max(state.times.start);
            state.status = match outcome {
                Ok(()) => EventStatus::Complete,
                Err(msg) => EventStatus::Error(msg),
            };
            self.inner.done.notify_all();
            let status = state.status.clone();
            std::mem::take(&mut state.subscribers)
                .into_iter()
                .map(|tx| (tx, status.clone()))
                .collect::<Vec<_>>()
        };
        for (tx, status) in subscribers {
            let _ = tx.send(status);
        }
        true
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("command", &self.inner.command)
            .field("status", &self.status())
            .finish()
    }
}

/// Event completed by the host instead of a queue. Commands that wait on it
/// stay pending until [`complete`](UserEvent::complete) or
/// [`fail`](UserEvent::fail) is called.
#[derive(Debug, Clone)]
pub struct UserEvent {
    event: Event,
}

impl UserEvent {
    pub(crate) fn new(context_id: u64) -> Self {
        Self {
            event: Event::new(
                CommandType::User,
                context_id,
                Instant::now(),
                false,
                EventStatus::Submitted,
            ),
        }
    }

    pub fn complete(&self) -> Result<()> {
        if self.event.finish(Ok(())) {
            Ok(())
        } else {
            Err(Error::dispatch("user event already finished"))
        }
    }

    /// Finish with an error; dependent commands fail.
    pub fn fail<S: Into<String>>(&self, reason: S) -> Result<()> {
        if self.event.finish(Err(reason.into())) {
            Ok(())
        } else {
            Err(Error::dispatch("user event already finished"))
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }
}

impl From<&UserEvent> for Event {
    fn from(user: &UserEvent) -> Self {
        user.event.clone()
    }
}
