//! Global CLI options mapped onto the host configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use viper_host::HostConfig;

/// Engine and environment options shared by every command.
///
/// Unset options fall back to `HostConfig::from_env()`.
#[derive(Args, Debug, Clone)]
pub struct HostOpts {
    /// Engine jar (env: VIPER_IGV_JAR)
    #[arg(long, global = true, env = "VIPER_IGV_JAR")]
    pub igv_jar: Option<PathBuf>,

    /// Reference genome FASTA (env: VIPER_FASTA_REF)
    #[arg(long, global = true, env = "VIPER_FASTA_REF")]
    pub fasta_ref: Option<PathBuf>,

    /// Engine control port (env: VIPER_IGV_PORT)
    #[arg(long, global = true, env = "VIPER_IGV_PORT")]
    pub port: Option<u16>,

    /// Engine heap size in megabytes
    #[arg(long, global = true)]
    pub heap_mb: Option<u32>,

    /// Engine property file
    #[arg(long, global = true)]
    pub property_file: Option<PathBuf>,

    /// Engine log file (env: VIPER_IGV_LOG)
    #[arg(long, global = true, env = "VIPER_IGV_LOG")]
    pub log_file: Option<PathBuf>,

    /// Directory snapshots are rendered into (env: VIPER_WORK_DIR)
    #[arg(long, global = true, env = "VIPER_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Directory holding `<sample>.bam` files (env: VIPER_BAM_DIR)
    #[arg(long, global = true, env = "VIPER_BAM_DIR")]
    pub bam_dir: Option<PathBuf>,

    /// Virtual display index (env: VIPER_XVFB_DISPLAY)
    #[arg(long, global = true, env = "VIPER_XVFB_DISPLAY")]
    pub xvfb_display: Option<u32>,

    /// Seconds to wait for the engine to accept connections
    #[arg(long, global = true)]
    pub startup_timeout_secs: Option<u64>,
}

impl HostOpts {
    pub fn host_config(&self) -> HostConfig {
        let mut config = HostConfig::from_env();
        if let Some(jar) = &self.igv_jar {
            config.engine.jar = jar.clone();
        }
        if let Some(fasta) = &self.fasta_ref {
            config.engine.fasta_ref = fasta.clone();
        }
        if let Some(port) = self.port {
            config.engine.port = port;
        }
        if let Some(heap) = self.heap_mb {
            config.engine.heap_mb = heap;
        }
        if let Some(path) = &self.property_file {
            config.engine.property_file = path.clone();
        }
        if let Some(path) = &self.log_file {
            config.engine.log_file = path.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(dir) = &self.bam_dir {
            config.bam_dir = dir.clone();
        }
        if let Some(display) = self.xvfb_display {
            config.display.display = display;
        }
        if let Some(secs) = self.startup_timeout_secs {
            config.startup_timeout = Duration::from_secs(secs);
        }
        config
    }
}
