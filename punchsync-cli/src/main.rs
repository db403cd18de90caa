//! punchsync - attendance punch sync CLI.
//!
//! # Usage
//!
//! ```text
//! punchsync sync [--driver <id>] [--clear] [--batch-size <n>] [--test] [--yes]
//! punchsync watch [--driver <id>] [--interval <secs>] [--batch-size <n>] [--test]
//! punchsync cursor show [<id>]
//! punchsync cursor set <id> <epoch | "YYYY-MM-DD HH:MM:SS">
//! punchsync cursor clear <id>
//! punchsync config init [--force]
//! punchsync config show
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand, cursor::CursorCommand, sync::SyncArgs, watch::WatchArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "punchsync",
    version,
    about = "Sync attendance punches from devices to a remote collector",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch all records from a device once and send them to the collector.
    Sync(SyncArgs),

    /// Poll a device continuously and sync new records as they appear.
    Watch(WatchArgs),

    /// Inspect or reset the per-device sync cursor.
    Cursor {
        #[command(subcommand)]
        command: CursorCommand,
    },

    /// Create or inspect ~/.punchsync/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Watch(args) => args.run(),
        Commands::Cursor { command } => commands::cursor::run(command),
        Commands::Config { command } => commands::config::run(command),
    }
}
