//! Engine commands and the priority queue the worker drains.
//!
//! This module provides:
//! - `Command`: an atomic batch of protocol steps with a dedup key and a
//!   completion callback
//! - `CommandQueue`: a thread-safe max-heap ordered by urgency, then by
//!   enqueue order, with removal by dedup key

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Dedup key shared by every preference/setup command. These are protocol
/// bookkeeping, not snapshots, and never get ledger entries.
pub const PREFERENCE_CHANGE_KEY: &str = "pref-change";

pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

pub struct Command {
    key: String,
    steps: Vec<String>,
    urgent: bool,
    on_complete: Option<CompletionCallback>,
}

impl Command {
    pub fn new(key: impl Into<String>, steps: Vec<String>, urgent: bool) -> Self {
        Self {
            key: key.into(),
            steps,
            urgent,
            on_complete: None,
        }
    }

    /// Urgent single-step command that changes an engine preference.
    pub fn preference_change(step: impl Into<String>) -> Self {
        Self::new(PREFERENCE_CHANGE_KEY, vec![step.into()], true)
    }

    pub fn with_completion(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    pub fn is_preference_change(&self) -> bool {
        self.key == PREFERENCE_CHANGE_KEY
    }

    /// Run the completion callback. Consuming `self` makes it fire at most once.
    pub fn complete(mut self) {
        if let Some(callback) = self.on_complete.take() {
            callback();
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("key", &self.key)
            .field("steps", &self.steps)
            .field("urgent", &self.urgent)
            .finish_non_exhaustive()
    }
}

// Commands are identified by their dedup key alone.
impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Command {}

struct QueueEntry {
    seq: u64,
    command: Command,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Primary: urgent commands are "greater" so the max-heap yields them first
        // Secondary: earlier sequence number wins (FIFO within one urgency)
        self.command
            .urgent
            .cmp(&other.command.urgent)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

#[derive(Default)]
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
    available: Notify,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, command: Command) {
        {
            let mut inner = self.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(QueueEntry { seq, command });
        }
        self.available.notify_one();
    }

    pub fn try_pop(&self) -> Option<Command> {
        self.lock().heap.pop().map(|entry| entry.command)
    }

    /// Pop the next command, waiting up to `timeout` for one to arrive.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Command> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(command) = self.try_pop() {
                return Some(command);
            }
            // A stale permit from an earlier push wakes us early; go round again.
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Remove every queued command with this dedup key. Returns whether any
    /// was still queued; `false` means the worker already took it (or it was
    /// never queued).
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.heap.len();
        inner.heap.retain(|entry| entry.command.key != key);
        inner.heap.len() != before
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().heap.iter().any(|entry| entry.command.key == key)
    }

    /// Take every queued command, in the order the worker would have run them.
    pub fn drain(&self) -> Vec<Command> {
        let heap = std::mem::take(&mut self.lock().heap);
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|entry| entry.command)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("len", &self.len())
            .finish()
    }
}
