pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod ledger;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod supervisor;
pub mod worker;

pub use channel::ControlChannel;
pub use command::{Command, CommandQueue, PREFERENCE_CHANGE_KEY};
pub use config::{DisplayConfig, EngineConfig, HostConfig};
pub use error::VisualizerError;
pub use ledger::{SnapshotLedger, SnapshotState};
pub use scheduler::Scheduler;
pub use service::{ServiceState, VisualizerService};
pub use settings::{SettingValue, SettingsStore};
pub use supervisor::ProcessSupervisor;
pub use worker::{CommandWorker, WorkerExit};
