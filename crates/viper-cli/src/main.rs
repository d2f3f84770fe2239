mod commands;
mod opts;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::render::RenderArgs;
use commands::settings::SettingsArgs;
use opts::HostOpts;

#[derive(Parser, Debug)]
#[command(name = "viper", version, about = "Render genome browser snapshots on demand")]
struct Cli {
    #[command(flatten)]
    opts: HostOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch the engine, render snapshots and copy them out
    Render(RenderArgs),

    /// Show the settings read from the engine property file
    Settings(SettingsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();

    match cli.command {
        Command::Render(args) => commands::render::cmd_render(&cli.opts, &args).await,
        Command::Settings(args) => commands::settings::cmd_settings(&cli.opts, &args),
    }
}

/// Set up tracing subscriber; `RUST_LOG` overrides the default `info` level.
fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}
