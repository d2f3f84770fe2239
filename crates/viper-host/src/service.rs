//! Composition root: owns the supervisor, the scheduler and the worker task.
//!
//! Lifecycle: `Created -> Starting -> Connecting -> Ready -> Draining -> Stopped`,
//! with any state able to jump to `Stopped` on a fatal failure or an explicit
//! shutdown. The current state is published on a watch channel; the worker
//! uses it as its stop signal.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::ControlChannel;
use crate::command::Command;
use crate::config::HostConfig;
use crate::error::VisualizerError;
use crate::scheduler::Scheduler;
use crate::settings::{SettingValue, SettingsStore};
use crate::supervisor::ProcessSupervisor;
use crate::worker::{CommandWorker, WorkerExit, stopped};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Starting,
    Connecting,
    Ready,
    Draining,
    Stopped,
}

impl ServiceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Draining | Self::Stopped)
    }
}

struct ServiceInner {
    config: HostConfig,
    supervisor: ProcessSupervisor,
    scheduler: Scheduler,
    state: watch::Sender<ServiceState>,
    torn_down: AtomicBool,
    /// Set when the engine exited before accepting a control connection.
    engine_exited: AtomicBool,
}

impl ServiceInner {
    /// Move forward to `next` unless the service is already draining or stopped.
    fn advance(&self, next: ServiceState) -> bool {
        let advanced = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = next;
                true
            }
        });
        if advanced {
            tracing::debug!(state = ?next, "visualizer state changed");
        }
        advanced
    }

    fn begin_drain(&self) {
        self.advance(ServiceState::Draining);
    }

    /// Release processes and files and publish `Stopped`. Runs once; later
    /// calls return immediately.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.supervisor.shutdown();
        self.state.send_replace(ServiceState::Stopped);
        tracing::info!("visualizer stopped");
    }
}

pub struct VisualizerService {
    inner: Arc<ServiceInner>,
    worker: Mutex<Option<JoinHandle<WorkerExit>>>,
}

impl VisualizerService {
    pub fn new(config: HostConfig) -> Self {
        let scheduler = Scheduler::new(
            SettingsStore::with_defaults(),
            config.work_dir.clone(),
            config.bam_dir.clone(),
        );
        let supervisor = ProcessSupervisor::new(config.clone());
        let (state, _) = watch::channel(ServiceState::Created);
        Self {
            inner: Arc::new(ServiceInner {
                config,
                supervisor,
                scheduler,
                state,
                torn_down: AtomicBool::new(false),
                engine_exited: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.inner.state.subscribe()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Launch the engine, seed the settings from its property file and spawn
    /// the worker task, which connects and then marks the service ready.
    ///
    /// Spawn failures stop the service and are returned. Calling `start` on a
    /// service that is already running is a no-op.
    pub async fn start(&self) -> Result<(), VisualizerError> {
        let inner = &self.inner;
        match self.state() {
            ServiceState::Created => {}
            ServiceState::Draining | ServiceState::Stopped => return Err(VisualizerError::Stopped),
            _ => return Ok(()),
        }
        inner.advance(ServiceState::Starting);

        if let Err(err) = inner.supervisor.start().await {
            tracing::error!("failed to start engine: {err}");
            inner.teardown();
            return Err(err);
        }

        std::fs::create_dir_all(&inner.config.work_dir).map_err(|source| {
            inner.teardown();
            VisualizerError::WorkDir {
                path: inner.config.work_dir.clone(),
                source,
            }
        })?;

        let settings = SettingsStore::load(&inner.config.engine.property_file);
        inner.scheduler.seed_settings(settings);

        if !inner.advance(ServiceState::Connecting) {
            inner.teardown();
            return Err(VisualizerError::Stopped);
        }
        let handle = tokio::spawn(run_worker(Arc::clone(inner)));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Wait until the service is ready to execute commands.
    ///
    /// Fails with `StartupTimeout` if that takes longer than `timeout`, with
    /// `EngineExited` if the engine process dies before accepting a
    /// connection, or with `Stopped` if the service shuts down first.
    pub async fn await_startup(&self, timeout: Duration) -> Result<(), VisualizerError> {
        let mut state = self.subscribe();
        let ready = async {
            loop {
                let current = *state.borrow_and_update();
                match current {
                    ServiceState::Ready => return Ok(()),
                    ServiceState::Draining | ServiceState::Stopped => {
                        return Err(self.stop_reason());
                    }
                    _ => {}
                }
                if state.changed().await.is_err() {
                    return Err(self.stop_reason());
                }
            }
        };
        tokio::time::timeout(timeout, ready)
            .await
            .map_err(|_| VisualizerError::StartupTimeout(timeout))?
    }

    fn stop_reason(&self) -> VisualizerError {
        if self.inner.engine_exited.load(Ordering::SeqCst) {
            VisualizerError::EngineExited
        } else {
            VisualizerError::Stopped
        }
    }

    /// See [`Scheduler::schedule_snapshot`].
    pub fn schedule_snapshot(&self, sample: &str, chr: &str, pos: u64, urgent: bool) -> String {
        self.inner.scheduler.schedule_snapshot(sample, chr, pos, urgent)
    }

    pub fn is_snapshot_done(&self, key: &str) -> bool {
        self.inner.scheduler.is_snapshot_done(key)
    }

    pub fn snapshot_path(&self, key: &str) -> PathBuf {
        self.inner.scheduler.snapshot_path(key)
    }

    /// See [`Scheduler::set_configuration_value`].
    pub fn set_configuration_value(&self, key: &str, value: impl Into<SettingValue>) -> String {
        self.inner.scheduler.set_configuration_value(key, value)
    }

    pub fn configuration(&self) -> Vec<(String, SettingValue)> {
        self.inner.scheduler.configuration()
    }

    pub fn configuration_hash(&self) -> String {
        self.inner.scheduler.configuration_hash()
    }

    /// Stop the worker, close the control connection, terminate the engine and
    /// the virtual display, and remove rendered snapshots.
    ///
    /// Safe to call repeatedly and from several tasks at once.
    pub async fn shutdown(&self) {
        self.inner.begin_drain();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(exit) => tracing::debug!(?exit, "worker joined"),
                Err(err) => tracing::warn!("worker task failed: {err}"),
            }
        }
        self.inner.teardown();
    }
}

impl Drop for VisualizerService {
    fn drop(&mut self) {
        let started = self.state() != ServiceState::Created;
        self.inner.begin_drain();
        let worker_running = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        // A running worker tears down on its own once it sees the drain.
        if started && !worker_running {
            self.inner.teardown();
        }
    }
}

async fn run_worker(inner: Arc<ServiceInner>) -> WorkerExit {
    let mut state = inner.state.subscribe();

    let stream = tokio::select! {
        stream = inner.supervisor.connect() => stream,
        _ = stopped(&mut state) => None,
    };
    let Some(stream) = stream else {
        let exit = if state.borrow().is_terminal() {
            WorkerExit::Stopped
        } else {
            tracing::error!("engine exited before accepting a control connection");
            inner.engine_exited.store(true, Ordering::SeqCst);
            WorkerExit::EngineExited
        };
        inner.teardown();
        return exit;
    };

    inner
        .scheduler
        .enqueue(Command::preference_change("setSleepInterval 0"));
    if inner.advance(ServiceState::Ready) {
        tracing::info!(port = inner.config.engine.port, "visualizer ready");
    }

    let worker = CommandWorker::new(
        Arc::clone(inner.scheduler.queue()),
        ControlChannel::new(stream),
        inner.config.worker_poll,
    );
    let alive = {
        let inner = Arc::clone(&inner);
        move || inner.supervisor.is_alive()
    };
    let exit = worker.run(alive, state).await;
    if exit == WorkerExit::EngineExited {
        tracing::warn!("engine process exited; shutting down");
    }
    inner.teardown();
    exit
}
