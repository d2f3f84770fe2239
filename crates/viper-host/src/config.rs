use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONTROL_PORT: u16 = 60151;
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub engine: EngineConfig,
    pub display: DisplayConfig,
    /// Directory rendered snapshot images are written to.
    pub work_dir: PathBuf,
    /// Directory holding one `<sample>.bam` alignment per sample.
    pub bam_dir: PathBuf,
    pub startup_timeout: Duration,
    /// Delay between attempts to reach the engine's control port.
    pub connect_retry: Duration,
    /// Upper bound on how long the worker waits for a command before
    /// re-checking engine liveness.
    pub worker_poll: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            display: DisplayConfig::default(),
            work_dir: PathBuf::from("snapshots"),
            bam_dir: PathBuf::from("bam"),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            connect_retry: Duration::from_millis(500),
            worker_poll: Duration::from_secs(1),
        }
    }
}

impl HostConfig {
    /// Build HostConfig from defaults overridden by `VIPER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(jar) = env_var("VIPER_IGV_JAR") {
            config.engine.jar = jar.into();
        }
        if let Some(fasta) = env_var("VIPER_FASTA_REF") {
            config.engine.fasta_ref = fasta.into();
        }
        if let Some(port) = env_parse("VIPER_IGV_PORT") {
            config.engine.port = port;
        }
        if let Some(log) = env_var("VIPER_IGV_LOG") {
            config.engine.log_file = log.into();
        }
        if let Some(dir) = env_var("VIPER_WORK_DIR") {
            config.work_dir = dir.into();
        }
        if let Some(dir) = env_var("VIPER_BAM_DIR") {
            config.bam_dir = dir.into();
        }
        if let Some(display) = env_parse("VIPER_XVFB_DISPLAY") {
            config.display.display = display;
        }
        config
    }
}

/// How the engine process is launched.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub java: String,
    pub jar: PathBuf,
    pub fasta_ref: PathBuf,
    pub port: u16,
    pub heap_mb: u32,
    /// Property file handed to the engine and read back to seed the settings store.
    pub property_file: PathBuf,
    pub log_file: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            java: "java".into(),
            jar: PathBuf::from("igv.jar"),
            fasta_ref: PathBuf::from("reference.fa"),
            port: DEFAULT_CONTROL_PORT,
            heap_mb: 2000,
            property_file: PathBuf::from("igv.properties"),
            log_file: PathBuf::from("igv.log"),
        }
    }
}

impl EngineConfig {
    pub fn launch_args(&self) -> Vec<String> {
        vec![
            format!("-Xmx{}m", self.heap_mb),
            "-Dproduction=true".into(),
            "-Dsun.java2d.noddraw=true".into(),
            "-Dapple.laf.useScreenMenuBar=true".into(),
            "-Djava.net.preferIPv4Stack=true".into(),
            "-jar".into(),
            self.jar.display().to_string(),
            "-p".into(),
            self.port.to_string(),
            "-g".into(),
            self.fasta_ref.display().to_string(),
            "-o".into(),
            self.property_file.display().to_string(),
        ]
    }
}

/// Virtual X display the engine renders into when one is installed.
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub program: String,
    pub display: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            program: "Xvfb".into(),
            display: 99,
            width: 1920,
            height: 1080,
            depth: 24,
        }
    }
}

impl DisplayConfig {
    /// Value for the engine's `DISPLAY` variable, e.g. `:99`.
    pub fn display_name(&self) -> String {
        format!(":{}", self.display)
    }

    pub fn launch_args(&self) -> Vec<String> {
        vec![
            self.display_name(),
            "-screen".into(),
            "0".into(),
            format!("{}x{}x{}", self.width, self.height, self.depth),
        ]
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_var(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring malformed environment override");
            None
        }
    }
}
