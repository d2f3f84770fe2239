//! Lifecycle of the engine process and the optional virtual display it renders into.

use std::fs::OpenOptions;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::config::HostConfig;
use crate::error::VisualizerError;

#[derive(Debug)]
pub struct ProcessSupervisor {
    config: HostConfig,
    engine: Mutex<Option<Child>>,
    display: Mutex<Option<Child>>,
}

fn lock(slot: &Mutex<Option<Child>>) -> MutexGuard<'_, Option<Child>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessSupervisor {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            engine: Mutex::new(None),
            display: Mutex::new(None),
        }
    }

    /// Whether the virtual display server is installed (its `-help` exits 0).
    pub async fn display_available(&self) -> bool {
        Command::new(&self.config.display.program)
            .arg("-help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Launch the virtual display (when installed) and the engine.
    ///
    /// The engine's stdout and stderr are appended to the configured log file.
    /// Spawn failures are returned to the caller; nothing is retried.
    pub async fn start(&self) -> Result<(), VisualizerError> {
        if lock(&self.engine).is_some() {
            tracing::warn!("engine already started");
            return Ok(());
        }

        let engine = &self.config.engine;
        let spawn_err = |source| VisualizerError::Spawn {
            program: engine.java.clone(),
            source,
        };
        let log_err = |source| VisualizerError::LogFile {
            path: engine.log_file.clone(),
            source,
        };
        let stdout_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&engine.log_file)
            .map_err(log_err)?;
        let stderr_log = stdout_log.try_clone().map_err(log_err)?;

        let mut command = Command::new(&engine.java);
        command
            .args(engine.launch_args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_log))
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true);

        if self.display_available().await {
            let display_cfg = &self.config.display;
            let child = Command::new(&display_cfg.program)
                .args(display_cfg.launch_args())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| VisualizerError::Spawn {
                    program: display_cfg.program.clone(),
                    source,
                })?;
            tracing::info!(
                display = %display_cfg.display_name(),
                pid = ?child.id(),
                "started virtual display"
            );
            *lock(&self.display) = Some(child);
            command.env("DISPLAY", display_cfg.display_name());
        } else {
            tracing::info!("no virtual display available; engine uses the inherited display");
        }

        let child = command.spawn().map_err(spawn_err)?;
        tracing::info!(
            pid = ?child.id(),
            port = engine.port,
            log = %engine.log_file.display(),
            "started engine"
        );
        *lock(&self.engine) = Some(child);
        Ok(())
    }

    /// Whether the engine process exists and has not exited.
    pub fn is_alive(&self) -> bool {
        match lock(&self.engine).as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Connect to the engine's control port, retrying until it accepts.
    ///
    /// Gives up (returning `None`) once the engine is gone or has exited.
    /// There is no timeout here; bound the wait with `await_startup` or by
    /// dropping the future.
    pub async fn connect(&self) -> Option<TcpStream> {
        let port = self.config.engine.port;
        loop {
            if !self.is_alive() {
                tracing::warn!(port, "engine is not running; giving up on control connection");
                return None;
            }
            match TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await {
                Ok(stream) => {
                    tracing::info!(port, "connected to engine control port");
                    return Some(stream);
                }
                Err(err) => {
                    tracing::debug!(port, "engine not accepting connections yet: {err}");
                    tokio::time::sleep(self.config.connect_retry).await;
                }
            }
        }
    }

    /// Stop the engine and the virtual display and remove rendered snapshots.
    ///
    /// Idempotent. Each step runs regardless of whether the others succeed.
    pub fn shutdown(&self) {
        if let Some(mut child) = lock(&self.engine).take() {
            match child.start_kill() {
                Ok(()) => tracing::info!(pid = ?child.id(), "engine terminated"),
                Err(err) => tracing::warn!("failed to terminate engine: {err}"),
            }
        }

        if let Some(mut child) = lock(&self.display).take() {
            match child.start_kill() {
                Ok(()) => tracing::info!(pid = ?child.id(), "virtual display terminated"),
                Err(err) => tracing::warn!("failed to terminate virtual display: {err}"),
            }
        }

        remove_snapshots(&self.config.work_dir);
    }
}

/// Delete every `.png` directly under `dir`, logging (not failing on) errors.
fn remove_snapshots(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(dir = %dir.display(), "skipping snapshot cleanup: {err}");
            return;
        }
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "png") {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => tracing::warn!(path = %path.display(), "failed to remove snapshot: {err}"),
            }
        }
    }
    if removed > 0 {
        tracing::info!(removed, dir = %dir.display(), "removed rendered snapshots");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> HostConfig {
        let mut config = HostConfig::default();
        config.work_dir = dir.to_path_buf();
        config.engine.java = dir.join("no-such-java").display().to_string();
        config.engine.log_file = dir.join("engine.log");
        config.display.program = dir.join("no-such-xvfb").display().to_string();
        config
    }

    #[tokio::test]
    async fn missing_display_tool_is_reported_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(config_in(dir.path()));
        assert!(!supervisor.display_available().await);
    }

    #[tokio::test]
    async fn engine_spawn_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(config_in(dir.path()));
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, VisualizerError::Spawn { .. }));
        assert!(!supervisor.is_alive());
    }

    #[tokio::test]
    async fn unwritable_log_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.engine.log_file = dir.path().join("missing").join("engine.log");
        let supervisor = ProcessSupervisor::new(config);

        let err = supervisor.start().await.unwrap_err();
        match err {
            VisualizerError::LogFile { path, .. } => {
                assert_eq!(path, dir.path().join("missing").join("engine.log"));
            }
            other => panic!("expected LogFile error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_gives_up_without_engine() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(config_in(dir.path()));
        assert!(supervisor.connect().await.is_none());
    }

    #[test]
    fn shutdown_removes_snapshots_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("S1-1-1000-abc.png"), b"png").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        let supervisor = ProcessSupervisor::new(config_in(dir.path()));
        supervisor.shutdown();
        supervisor.shutdown();

        assert!(!dir.path().join("S1-1-1000-abc.png").exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
