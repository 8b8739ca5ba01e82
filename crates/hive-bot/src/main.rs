//! Headless room participant.
//!
//! Connects to a room server, creates a room (or joins the one given with
//! `--room`), walks a square and logs who else is in the room. Useful as a
//! load generator and as a smoke test of a server deployment.
//!
//! Run with `cargo run -p hive-bot -- --username bot1`.
//! Run with `cargo run -p hive-bot -- --username bot2 --room ROOM1` to join.

mod walk;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use glam::DVec2;
use hive_config::{CliArgs, Config, NetworkConfig, default_config_dir};
use hive_net::{ConnectionState, FrameConfig, TcpConnector};
use hive_sync::{ClientConfig, SyncClient, SyncError};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::walk::SquareWalk;

const SIM_TICK: Duration = Duration::from_millis(16);
const REPORT_EVERY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    if config.debug.log_dir.is_none() {
        config.debug.log_dir = Some(config_dir.join("logs"));
    }
    hive_log::init_logging(Some(&config.debug), cfg!(debug_assertions));

    let addr = match resolve(&config.network).await {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Cannot resolve {}: {e}", config.network.server_address);
            return ExitCode::FAILURE;
        }
    };

    let username = match config.player.username.trim() {
        "" => "bot".to_string(),
        name => name.to_string(),
    };
    let spawn = DVec2::new(config.player.spawn_x, config.player.spawn_y);

    let connector = TcpConnector {
        addr,
        frame: FrameConfig {
            max_payload_size: config.network.max_frame_bytes,
        },
        heartbeat: Duration::from_millis(config.network.heartbeat_interval_ms),
    };
    let mut client = SyncClient::new(connector, ClientConfig::from(&config));

    let entered = match config.player.room_id.as_deref() {
        Some(room_id) => client
            .join_room(&username, room_id, spawn)
            .await
            .map(|()| room_id.to_string()),
        None => client.create_room(&username, spawn).await,
    };
    let room_id = match entered {
        Ok(room_id) => room_id,
        Err(e) => {
            warn!(error = %e, "could not enter a room");
            eprintln!("{}", e.user_message());
            return ExitCode::FAILURE;
        }
    };
    info!(%room_id, %username, %addr, "in room");

    let result = run(&mut client, spawn).await;
    client.shutdown();
    match result {
        Ok(()) => {
            info!("bye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            warn!(error = %e, "session ended");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn resolve(network: &NetworkConfig) -> std::io::Result<SocketAddr> {
    let target = format!("{}:{}", network.server_address, network.server_port);
    tokio::net::lookup_host(&target)
        .await?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, target.clone()))
}

/// Walk, pump and render until ctrl-c.
async fn run<C: hive_net::Connector>(client: &mut SyncClient<C>, origin: DVec2) -> Result<(), SyncError> {
    let mut walk = SquareWalk::new(origin, 96.0, 120.0, 400);
    let mut sim = tokio::time::interval(SIM_TICK);
    sim.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = tokio::time::interval(REPORT_EVERY);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            _ = sim.tick() => {
                if client.needs_rejoin() {
                    // While reconnecting, wait; once connected or failed, rejoin
                    // (which redials first when failed).
                    if matches!(client.connection_state(), ConnectionState::Connected | ConnectionState::Failed) {
                        client.rejoin().await?;
                    }
                    continue;
                }
                let dt = u64::try_from(SIM_TICK.as_millis()).unwrap_or(16);
                client.submit_movement(walk.step(dt))?;
                client.pump()?;
                client.render_tick();
            }
            _ = report.tick() => {
                let frame = client.players().borrow().clone();
                let others: Vec<String> = frame
                    .players
                    .iter()
                    .map(|p| format!("{}@({:.0},{:.0}) {}", p.username, p.position.x, p.position.y, p.animation))
                    .collect();
                info!(state = ?client.connection_state(), remote = others.len(), "{}", others.join(", "));
            }
        }
    }
}
