pub mod config;
pub mod cursor;
pub mod sync;
pub mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;

use punchsync_core::{config as core_config, Config, DeviceInfo};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// `config.yaml` plus `ATTENDANCE_*` overrides, validated.
pub(crate) fn load_config(home: &std::path::Path) -> Result<Config> {
    core_config::load_with_env_at(home).with_context(|| {
        format!(
            "failed to load configuration from {}",
            core_config::config_path_at(home).display()
        )
    })
}

pub(crate) fn banner(title: &str, info: &DeviceInfo) {
    let line = "═".repeat(59);
    println!("{}", format!("╔{line}╗").cyan());
    println!(
        "{}",
        format!("║  {title} ({} / {})", info.device_type, info.identity).cyan()
    );
    println!("{}", format!("╚{line}╝").cyan());
    println!();
}

pub(crate) fn print_device_info(info: &DeviceInfo) {
    println!("{}", "Device info:".bold());
    println!("   type: {}", info.device_type);
    println!("   identity: {}", info.identity);
    if let Some(ip) = &info.ip {
        println!("   ip: {ip}");
    }
    if let Some(port) = info.port {
        println!("   port: {port}");
    }
    println!(
        "   capabilities: incremental_fetch={}, clear_source={}",
        info.capabilities.incremental_fetch, info.capabilities.clear_source
    );
    for (key, value) in &info.details {
        match value {
            serde_json::Value::String(s) => println!("   {key}: {s}"),
            other => println!("   {key}: {other}"),
        }
    }
}

pub(crate) fn ok(msg: impl std::fmt::Display) {
    println!("{} {msg}", "✓".green().bold());
}

pub(crate) fn warn(msg: impl std::fmt::Display) {
    println!("{} {msg}", "!".yellow().bold());
}

pub(crate) fn fail(msg: impl std::fmt::Display) {
    eprintln!("{} {msg}", "✗".red().bold());
}
