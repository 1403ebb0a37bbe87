// ── Daemon log ring ──

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Bounded buffer of the most recent daemon output and lifecycle notes.
#[derive(Debug, Clone)]
pub struct DaemonLog {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl DaemonLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a line, dropping the oldest once full.
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
