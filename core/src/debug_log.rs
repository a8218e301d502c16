//! Per-connection debug queue
//!
//! Every connection-scoped error, warning, and lifecycle note lands here in
//! addition to the tracing output, so a frontend can inspect what happened to
//! a single connection. The queue is a bounded FIFO: when full, the oldest
//! entry is dropped and counted.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const DEFAULT_CAPACITY: usize = 512;

/// Entry severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One debug entry
#[derive(Debug, Clone)]
pub struct DebugEntry {
    /// When the entry was recorded
    pub at: DateTime<Utc>,
    /// Entry severity
    pub severity: Severity,
    /// Location tag, e.g. the component that produced the entry
    pub location: &'static str,
    /// Human-readable text
    pub text: String,
}

/// Bounded debug queue, shared between a connection's tasks
#[derive(Clone)]
pub struct DebugLog {
    inner: Arc<DebugLogInner>,
}

struct DebugLogInner {
    entries: Mutex<VecDeque<DebugEntry>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DebugLogInner {
                entries: Mutex::new(VecDeque::new()),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Record an entry, dropping the oldest one when the queue is full.
    pub fn push(&self, severity: Severity, location: &'static str, text: impl Into<String>) {
        let entry = DebugEntry {
            at: Utc::now(),
            severity,
            location,
            text: text.into(),
        };
        let mut entries = self.inner.entries.lock().expect("debug log poisoned");
        if entries.len() >= self.inner.capacity {
            entries.pop_front();
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(entry);
    }

    pub fn error(&self, location: &'static str, text: impl Into<String>) {
        self.push(Severity::Error, location, text);
    }

    pub fn warning(&self, location: &'static str, text: impl Into<String>) {
        self.push(Severity::Warning, location, text);
    }

    pub fn info(&self, location: &'static str, text: impl Into<String>) {
        self.push(Severity::Info, location, text);
    }

    /// Copy of the queued entries, oldest first
    pub fn snapshot(&self) -> Vec<DebugEntry> {
        self.inner
            .entries
            .lock()
            .expect("debug log poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Number of entries dropped due to overflow
    pub fn dropped_entries(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::new()
    }
}
