//! `viper render` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use viper_host::{SettingValue, VisualizerService};

use crate::opts::HostOpts;

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Region to render, as SAMPLE:CHR:POS (repeatable)
    #[arg(long = "target", required = true, value_parser = parse_target)]
    pub targets: Vec<Target>,

    /// Schedule every target ahead of background work
    #[arg(long)]
    pub urgent: bool,

    /// Apply a setting before rendering, as KEY=VALUE (repeatable)
    #[arg(long = "set", value_parser = parse_setting)]
    pub settings: Vec<(String, SettingValue)>,

    /// Directory the finished snapshots are copied into
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Give up on snapshots that are not finished after this many seconds
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub sample: String,
    pub chr: String,
    pub pos: u64,
}

fn parse_target(raw: &str) -> Result<Target, String> {
    let mut parts = raw.rsplitn(3, ':');
    let (Some(pos), Some(chr), Some(sample)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected SAMPLE:CHR:POS, got '{raw}'"));
    };
    if sample.is_empty() || chr.is_empty() {
        return Err(format!("expected SAMPLE:CHR:POS, got '{raw}'"));
    }
    let pos = pos
        .parse::<u64>()
        .map_err(|e| format!("invalid position '{pos}': {e}"))?;
    Ok(Target {
        sample: sample.to_string(),
        chr: chr.to_string(),
        pos,
    })
}

fn parse_setting(raw: &str) -> Result<(String, SettingValue), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), SettingValue::parse(value))),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

pub async fn cmd_render(opts: &HostOpts, args: &RenderArgs) -> Result<()> {
    let config = opts.host_config();
    let startup_timeout = config.startup_timeout;
    let poll = config.worker_poll;
    let service = Arc::new(VisualizerService::new(config));
    let exit_hook = tokio::spawn(shutdown_on_signal(Arc::clone(&service)));

    let result = render(&service, args, startup_timeout, poll).await;
    service.shutdown().await;
    exit_hook.abort();
    result
}

async fn render(
    service: &VisualizerService,
    args: &RenderArgs,
    startup_timeout: Duration,
    poll: Duration,
) -> Result<()> {
    service.start().await.context("start engine")?;
    service
        .await_startup(startup_timeout)
        .await
        .context("wait for engine")?;

    for (key, value) in &args.settings {
        let hash = service.set_configuration_value(key, value.clone());
        tracing::info!(key = %key, value = %value, hash = %hash, "setting applied");
    }

    let keys: Vec<String> = args
        .targets
        .iter()
        .map(|t| service.schedule_snapshot(&t.sample, &t.chr, t.pos, args.urgent))
        .collect();

    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    while !keys.iter().all(|key| service.is_snapshot_done(key)) {
        if service.state().is_terminal() {
            anyhow::bail!("visualizer stopped before all snapshots were rendered");
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out after {}s waiting for snapshots", args.timeout_secs);
        }
        tokio::time::sleep(poll).await;
    }

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create output directory {}", args.out.display()))?;
    for key in &keys {
        let rendered = service.snapshot_path(key);
        let dest = args.out.join(format!("{key}.png"));
        std::fs::copy(&rendered, &dest)
            .with_context(|| format!("copy {} to {}", rendered.display(), dest.display()))?;
        println!("{}", dest.display());
    }
    Ok(())
}

const SIGINT: i32 = 2;
const SIGTERM: i32 = 15;

/// Exit status a shell reports for a process ended by `signal`.
fn signal_exit_code(signal: i32) -> i32 {
    128 + signal
}

/// Shut the service down and exit on Ctrl-C or SIGTERM.
async fn shutdown_on_signal(service: Arc<VisualizerService>) {
    #[cfg(unix)]
    let mut term =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    #[cfg(unix)]
    let terminate = async {
        match term.as_mut() {
            Some(t) => {
                t.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, shutting down...");
            SIGINT
        }
        _ = terminate => {
            tracing::info!("SIGTERM received, shutting down...");
            SIGTERM
        }
    };
    service.shutdown().await;
    std::process::exit(signal_exit_code(signal));
}
