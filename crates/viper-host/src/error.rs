use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisualizerError {
    #[error("engine did not accept connections within {0:?}, check the engine log")]
    StartupTimeout(Duration),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("engine exited before accepting control connections, check the engine log")]
    EngineExited,
    #[error("failed to open engine log {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("control protocol i/o error: {0}")]
    ProtocolIo(#[from] std::io::Error),
    #[error("failed to read property file {}: {source}", .path.display())]
    PropertyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare snapshot directory {}: {source}", .path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("visualizer service stopped")]
    Stopped,
}
