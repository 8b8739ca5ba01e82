//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Hive client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "hive-bot", about = "Headless Hive room participant")]
pub struct CliArgs {
    /// Room server host.
    #[arg(long)]
    pub server: Option<String>,

    /// Room server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Display name of the local participant.
    #[arg(long, short)]
    pub username: Option<String>,

    /// Join this room instead of creating one.
    #[arg(long, short)]
    pub room: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref name) = args.username {
            self.player.username = name.trim().to_string();
        }
        if let Some(ref room) = args.room {
            self.player.room_id = Some(room.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
