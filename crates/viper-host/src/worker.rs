//! The single consumer of the command queue.
//!
//! The worker owns the control channel: no other task writes to or reads from
//! the engine socket. It runs one command at a time, so the steps of two
//! commands never interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::channel::ControlChannel;
use crate::command::CommandQueue;
use crate::service::ServiceState;

/// Why the worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The service started draining or stopped.
    Stopped,
    /// The engine process is no longer alive.
    EngineExited,
}

pub struct CommandWorker<S = TcpStream> {
    queue: Arc<CommandQueue>,
    channel: ControlChannel<S>,
    poll_interval: Duration,
}

impl<S> CommandWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(queue: Arc<CommandQueue>, channel: ControlChannel<S>, poll_interval: Duration) -> Self {
        Self {
            queue,
            channel,
            poll_interval,
        }
    }

    /// Run commands until the service stops or `alive` reports the engine gone.
    ///
    /// Waits at most `poll_interval` for the next command before re-checking
    /// liveness. The control channel is dropped (closing the socket) when this
    /// returns.
    pub async fn run(
        mut self,
        alive: impl Fn() -> bool,
        mut state: watch::Receiver<ServiceState>,
    ) -> WorkerExit {
        tracing::info!("command worker started");
        let exit = loop {
            if state.borrow().is_terminal() {
                break WorkerExit::Stopped;
            }
            if !alive() {
                break WorkerExit::EngineExited;
            }

            let next = tokio::select! {
                command = self.queue.pop_timeout(self.poll_interval) => command,
                _ = stopped(&mut state) => break WorkerExit::Stopped,
            };
            let Some(command) = next else {
                continue;
            };

            tracing::debug!(
                key = %command.key(),
                urgent = command.is_urgent(),
                steps = command.steps().len(),
                "executing command"
            );
            tokio::select! {
                _ = self.channel.submit_all(command.steps()) => {}
                _ = stopped(&mut state) => {
                    tracing::info!(key = %command.key(), "command abandoned during shutdown");
                    break WorkerExit::Stopped;
                }
            }
            command.complete();
        };
        tracing::info!(?exit, "command worker stopped");
        exit
    }
}

/// Resolves once the service is draining or stopped (or its state sender is gone).
pub(crate) async fn stopped(state: &mut watch::Receiver<ServiceState>) {
    loop {
        if state.borrow_and_update().is_terminal() {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}
