//! `viper settings` command.

use anyhow::Result;
use clap::Args;
use viper_host::SettingsStore;

use crate::opts::HostOpts;

#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn cmd_settings(opts: &HostOpts, args: &SettingsArgs) -> Result<()> {
    let config = opts.host_config();
    let store = SettingsStore::load(&config.engine.property_file);
    let hash = store.hash();

    if args.json {
        let settings: serde_json::Map<String, serde_json::Value> = store
            .entries()
            .into_iter()
            .map(|(key, value)| serde_json::to_value(value).map(|value| (key, value)))
            .collect::<Result<_, serde_json::Error>>()?;
        let out = serde_json::json!({ "settings": settings, "hash": hash });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for (key, value) in store.entries() {
            println!("{key}={value}");
        }
        println!("hash: {hash}");
    }
    Ok(())
}
