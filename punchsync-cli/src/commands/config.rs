//! `punchsync config` - write the default config file or print the effective one.

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use punchsync_core::{config as core_config, Config};

use super::{home, load_config, ok};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write ~/.punchsync/config.yaml with the built-in defaults.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration (file plus ATTENDANCE_* overrides).
    Show,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = home()?;
    match command {
        ConfigCommand::Init { force } => {
            let path = core_config::config_path_at(&home);
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            let written = core_config::save_at(&home, &Config::default())?;
            ok(format!("Wrote {}", written.display()));
        }
        ConfigCommand::Show => {
            let mut config = load_config(&home)?;
            if !config.remote_api.key.is_empty() {
                config.remote_api.key = mask(&config.remote_api.key);
            }
            let yaml = serde_yaml::to_string(&config).context("failed to render configuration")?;
            print!("{yaml}");
        }
    }
    Ok(())
}

/// Keep the last four characters of a secret.
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{tail}", "*".repeat(chars.len() - 4))
}

#[cfg(test)]
mod tests {
    use super::mask;

    #[test]
    fn mask_keeps_tail() {
        assert_eq!(mask("abcdefgh"), "****efgh");
        assert_eq!(mask("abc"), "***");
    }
}
