//! Snapshot scheduling and configuration invalidation.
//!
//! The settings store and the dedup ledger live behind one mutex so that
//! scheduling decisions and configuration changes are mutually exclusive and
//! the ledger always agrees with queue membership. The worker only touches the
//! queue (and the ledger, through completion callbacks), so it never waits on
//! a caller for longer than a single ledger update.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::command::{Command, CommandQueue};
use crate::ledger::{SnapshotLedger, SnapshotState};
use crate::settings::{
    DEFAULT_VIEW_RANGE, PANEL_HEIGHT_KEY, SettingValue, SettingsStore, VIEW_RANGE_KEY,
};

#[derive(Debug, Default)]
struct SchedulerState {
    settings: SettingsStore,
    /// Values set through `set_configuration_value`; they outrank the property file.
    overrides: SettingsStore,
    ledger: SnapshotLedger,
}

#[derive(Debug)]
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
    queue: Arc<CommandQueue>,
    work_dir: PathBuf,
    bam_dir: PathBuf,
}

fn lock_state(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Compose the dedup key of a snapshot request under a configuration hash.
pub fn dedup_key(sample: &str, chr: &str, pos: u64, config_hash: &str) -> String {
    format!("{sample}-{chr}-{pos}-{config_hash}")
}

impl Scheduler {
    pub fn new(settings: SettingsStore, work_dir: impl Into<PathBuf>, bam_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                settings,
                overrides: SettingsStore::new(),
                ledger: SnapshotLedger::new(),
            })),
            queue: Arc::new(CommandQueue::new()),
            work_dir: work_dir.into(),
            bam_dir: bam_dir.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        lock_state(&self.state)
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Install the settings read from the engine's property file.
    ///
    /// Values already set at runtime stay on top of the file's. If the
    /// resulting hash differs, pending snapshots are invalidated the same way
    /// a configuration change invalidates them.
    pub fn seed_settings(&self, mut settings: SettingsStore) {
        let mut state = self.lock();
        for (key, value) in state.overrides.entries() {
            settings.set(key, value);
        }
        let changed = settings.hash() != state.settings.hash();
        state.settings = settings;
        if changed {
            let invalidated = self.invalidate_snapshots(&mut state);
            tracing::debug!(invalidated, "settings seeded from property file");
        }
    }

    /// Drop every queued snapshot and forget it in the ledger, keeping
    /// preference commands queued. Returns how many snapshots were dropped.
    fn invalidate_snapshots(&self, state: &mut SchedulerState) -> usize {
        let mut invalidated = 0usize;
        for command in self.queue.drain() {
            if command.is_preference_change() {
                self.queue.push(command);
            } else {
                state.ledger.remove(command.key());
                invalidated += 1;
            }
        }
        invalidated
    }

    pub fn enqueue(&self, command: Command) {
        self.queue.push(command);
    }

    /// Key a snapshot request would get under the current configuration.
    pub fn snapshot_key(&self, sample: &str, chr: &str, pos: u64) -> String {
        dedup_key(sample, chr, pos, &self.lock().settings.hash())
    }

    pub fn snapshot_path(&self, key: &str) -> PathBuf {
        snapshot_path(&self.work_dir, key)
    }

    /// Schedule a snapshot of `chr:pos` for `sample` and return its dedup key.
    ///
    /// A key already in the ledger is left alone unless the request is urgent
    /// and the snapshot is not yet done. An urgent re-request pulls the queued
    /// command and re-enqueues it ahead of background work; if the worker has
    /// already taken that command, the re-request is dropped rather than
    /// submitting the same snapshot twice.
    pub fn schedule_snapshot(&self, sample: &str, chr: &str, pos: u64, urgent: bool) -> String {
        let mut state = self.lock();
        let key = dedup_key(sample, chr, pos, &state.settings.hash());
        let existing = state.ledger.state(&key);

        match existing {
            Some(SnapshotState::Done) => return key,
            Some(SnapshotState::InProgress) if !urgent => return key,
            _ => {}
        }

        if urgent {
            let was_queued = self.queue.remove(&key);
            if existing.is_some() && !was_queued {
                tracing::debug!(key = %key, "snapshot already in flight; dropping urgent re-request");
                return key;
            }
        }

        let command = self.snapshot_command(&state.settings, &key, sample, chr, pos, urgent);
        state.ledger.mark_in_progress(&key);
        self.queue.push(command);
        tracing::debug!(key = %key, urgent, "snapshot scheduled");
        key
    }

    fn snapshot_command(
        &self,
        settings: &SettingsStore,
        key: &str,
        sample: &str,
        chr: &str,
        pos: u64,
        urgent: bool,
    ) -> Command {
        let range = settings
            .int(VIEW_RANGE_KEY)
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_VIEW_RANGE as u64);
        let bam = self.bam_dir.join(format!("{sample}.bam"));
        let image = self.snapshot_path(key);

        let steps = vec![
            "new".to_string(),
            format!("load {}", bam.display()),
            "collapse".to_string(),
            format!("goto {chr}:{}-{}", pos.saturating_sub(range), pos.saturating_add(range)),
            format!("snapshot {}", image.display()),
        ];

        let state = Arc::clone(&self.state);
        let done_key = key.to_string();
        Command::new(key, steps, urgent)
            .with_completion(move || lock_state(&state).ledger.mark_done(&done_key))
    }

    /// Change one setting and return the new configuration hash.
    ///
    /// Every pending snapshot is dropped from the queue and forgotten by the
    /// ledger, so a later identical request is scheduled afresh under the new
    /// hash. Pending preference commands are kept. Settings other than the
    /// view range are pushed to the engine with a preference command.
    pub fn set_configuration_value(&self, key: &str, value: impl Into<SettingValue>) -> String {
        let value = value.into();
        let mut state = self.lock();

        let invalidated = self.invalidate_snapshots(&mut state);

        let step = match key {
            VIEW_RANGE_KEY => None,
            PANEL_HEIGHT_KEY => Some(format!("maxPanelHeight {value}")),
            _ => Some(format!("preference {key} {value}")),
        };
        state.overrides.set(key, value.clone());
        state.settings.set(key, value);
        if let Some(step) = step {
            self.queue.push(Command::preference_change(step));
        }

        let hash = state.settings.hash();
        tracing::info!(key, invalidated, hash = %hash, "configuration changed");
        hash
    }

    pub fn is_snapshot_done(&self, key: &str) -> bool {
        self.lock().ledger.is_done(key)
    }

    pub fn snapshot_state(&self, key: &str) -> Option<SnapshotState> {
        self.lock().ledger.state(key)
    }

    pub fn configuration(&self) -> Vec<(String, SettingValue)> {
        self.lock().settings.entries()
    }

    pub fn configuration_hash(&self) -> String {
        self.lock().settings.hash()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }
}

pub fn snapshot_path(work_dir: &Path, key: &str) -> PathBuf {
    work_dir.join(format!("{key}.png"))
}
