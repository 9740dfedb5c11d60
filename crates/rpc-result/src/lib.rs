//! Client-side deferred result state machine: a per-request signal/slot
//! object tracking UPDATE/DONE/ERROR events and their observers.
//!
//! `parts`, the terminal outcome, and per-signal observer lists collapse
//! into a single `Terminal` enum: `is_ready()` holds exactly when `terminal`
//! is no longer `Pending`.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use rmpv::Value;
use tokio::sync::Notify;
use tracing::warn;

/// The three observer signals a `DeferredResult` can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Update,
    Done,
    Failed,
}

/// Terminal state of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Pending,
    Done(Value),
    Error(String),
}

type Slot = Box<dyn FnMut(&Value) + Send>;

/// One observer list per signal; a `None` entry is a tombstoned (disconnected)
/// slot so earlier handles never shift.
#[derive(Default)]
struct Slots {
    update: Vec<Option<Slot>>,
    done: Vec<Option<Slot>>,
    failed: Vec<Option<Slot>>,
}

impl Slots {
    fn list_mut(&mut self, signal: Signal) -> &mut Vec<Option<Slot>> {
        match signal {
            Signal::Update => &mut self.update,
            Signal::Done => &mut self.done,
            Signal::Failed => &mut self.failed,
        }
    }
}

/// A handle returned by `connect`, usable with `disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub signal: Signal,
    pub index: usize,
}

/// Per-request client-side state machine.
pub struct DeferredResult {
    pub result_id: uuid::Uuid,
    parts: Vec<Value>,
    terminal: Terminal,
    events: VecDeque<(Signal, Value)>,
    slots: Slots,
    notify: Notify,
}

impl DeferredResult {
    pub fn new(result_id: uuid::Uuid) -> Self {
        Self {
            result_id,
            parts: Vec::new(),
            terminal: Terminal::Pending,
            events: VecDeque::new(),
            slots: Slots::default(),
            notify: Notify::new(),
        }
    }

    /// Append an UPDATE payload. No-op once terminal.
    pub fn update(&mut self, payload: Value) {
        if self.is_ready() {
            return;
        }
        self.parts.push(payload.clone());
        self.events.push_back((Signal::Update, payload));
        self.notify.notify_waiters();
    }

    /// Mark the request DONE. No-op once terminal.
    pub fn done(&mut self, payload: Option<Value>) {
        if self.is_ready() {
            return;
        }
        let results = payload.unwrap_or_else(|| Value::Array(self.parts.clone()));
        self.terminal = Terminal::Done(results.clone());
        self.events.push_back((Signal::Done, results));
        self.notify.notify_waiters();
    }

    /// Mark the request ERROR. No-op once terminal.
    pub fn failure(&mut self, error: String) {
        if self.is_ready() {
            return;
        }
        self.terminal = Terminal::Error(error.clone());
        self.events
            .push_back((Signal::Failed, Value::String(error.into())));
        self.notify.notify_waiters();
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self.terminal, Terminal::Pending)
    }

    /// Number of queued, not-yet-processed events. Lets a registry owner
    /// decide a result is safe to drop only once both terminal and drained.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// Register an observer for `signal`; returns a dense positional handle.
    pub fn connect<F>(&mut self, signal: Signal, callback: F) -> Handle
    where
        F: FnMut(&Value) + Send + 'static,
    {
        let list = self.slots.list_mut(signal);
        list.push(Some(Box::new(callback)));
        Handle {
            signal,
            index: list.len() - 1,
        }
    }

    /// Tombstone a previously connected observer. Out-of-range or
    /// already-disconnected handles are silently ignored.
    pub fn disconnect(&mut self, handle: Handle) {
        if let Some(slot) = self.slots.list_mut(handle.signal).get_mut(handle.index) {
            *slot = None;
        }
    }

    /// Drain at most one event and invoke every connected observer for its
    /// signal, in registration order. A panicking observer does not stop
    /// later observers from running and does not poison state.
    pub fn process(&mut self) {
        let Some((signal, args)) = self.events.pop_front() else {
            return;
        };
        let list = self.slots.list_mut(signal);
        for slot in list.iter_mut().flatten() {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| slot(&args)));
            if result.is_err() {
                warn!("observer for {:?} signal panicked; isolated", signal);
            }
        }
    }

    /// Block cooperatively until `is_ready()` or `timeout` elapses. A zero
    /// duration means wait forever.
    pub async fn wait(&self, timeout: Duration) {
        if self.is_ready() {
            return;
        }
        if timeout.is_zero() {
            self.notify.notified().await;
        } else {
            let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        }
    }
}
