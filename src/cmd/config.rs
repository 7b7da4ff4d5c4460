//! Effective configuration view (`localnet show-config`).

use anyhow::Result;
use localnet::config::{CONFIG_FILE, render, validate};
use localnet_common::ClusterConfig;
use std::path::Path;

pub fn cmd_show_config(config: &ClusterConfig, explicit: Option<&Path>, dir: &Path) -> Result<()> {
    let source = match explicit {
        Some(path) => path.display().to_string(),
        None if dir.join(CONFIG_FILE).exists() => dir.join(CONFIG_FILE).display().to_string(),
        None => "defaults".to_string(),
    };
    println!("# source: {source} (with LOCALNET_* overrides)");
    if config.app_server.is_none() {
        println!("# app server: off");
    }
    print!("{}", render(config)?);

    let warnings = validate(config);
    if !warnings.is_empty() {
        println!();
        for warning in warnings {
            println!("# warning: {warning}");
        }
    }
    Ok(())
}
