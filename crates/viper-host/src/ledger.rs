use std::collections::HashMap;

/// Progress of a snapshot keyed by its dedup key. Keys without an entry have
/// not been scheduled under the current configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    InProgress,
    Done,
}

#[derive(Debug, Default)]
pub struct SnapshotLedger {
    entries: HashMap<String, SnapshotState>,
}

impl SnapshotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &str) -> Option<SnapshotState> {
        self.entries.get(key).copied()
    }

    pub fn is_done(&self, key: &str) -> bool {
        self.state(key) == Some(SnapshotState::Done)
    }

    pub fn mark_in_progress(&mut self, key: &str) {
        self.entries.insert(key.to_string(), SnapshotState::InProgress);
    }

    pub fn mark_done(&mut self, key: &str) {
        self.entries.insert(key.to_string(), SnapshotState::Done);
    }

    pub fn remove(&mut self, key: &str) -> Option<SnapshotState> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
