//! # Lobby Simulation
//!
//! Spins up a lobby of sessions on an in-process mesh, seeds the leader with
//! more records than everyone else, and prints convergence per heartbeat.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=meshsync_networking=debug lobby_simulation --peers 4 --records 12 --loss 20
//! ```

use std::process::ExitCode;

use meshsync_networking::{LocalLobby, NetworkConditions, PeerRole, SessionConfig, SyncResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct Options {
    peers: usize,
    records: usize,
    ticks: usize,
    loss_percent: u8,
    seed: u64,
    config: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            peers: 3,
            records: 5,
            ticks: 20,
            loss_percent: 0,
            seed: 7,
            config: None,
        }
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

fn parse_args() -> Option<Options> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--peers" | "-n" => {
                options.peers = value.and_then(|v| v.parse().ok()).unwrap_or(options.peers);
                i += 1;
            }
            "--records" | "-r" => {
                options.records = value.and_then(|v| v.parse().ok()).unwrap_or(options.records);
                i += 1;
            }
            "--ticks" | "-t" => {
                options.ticks = value.and_then(|v| v.parse().ok()).unwrap_or(options.ticks);
                i += 1;
            }
            "--loss" | "-l" => {
                options.loss_percent = value
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(options.loss_percent)
                    .min(100);
                i += 1;
            }
            "--seed" | "-s" => {
                options.seed = value.and_then(|v| v.parse().ok()).unwrap_or(options.seed);
                i += 1;
            }
            "--config" | "-c" => {
                options.config = value.cloned();
                i += 1;
            }
            "--help" | "-h" => {
                println!("Usage: lobby_simulation [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -n, --peers <NUM>      Peers in the lobby (default: 3)");
                println!("  -r, --records <NUM>    Records seeded on the leader (default: 5)");
                println!("  -t, --ticks <NUM>      Heartbeats to run (default: 20)");
                println!("  -l, --loss <PCT>       Unreliable packet loss (default: 0)");
                println!("  -s, --seed <NUM>       Loss RNG seed (default: 7)");
                println!("  -c, --config <PATH>    Session config TOML for every peer");
                println!("  -h, --help             Show this help");
                return None;
            }
            _ => {}
        }
        i += 1;
    }

    options.peers = options.peers.max(1);
    Some(options)
}

fn run(options: &Options) -> SyncResult<bool> {
    let base = match &options.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let dt = base.heartbeat_interval_secs;

    let conditions = NetworkConditions {
        packet_loss_percent: options.loss_percent,
        ..NetworkConditions::PERFECT
    }
    .with_seed(options.seed);
    let mut lobby = LocalLobby::new(conditions);

    for i in 0..options.peers {
        let name = format!("peer-{i}");
        let config = SessionConfig {
            display_name: name.clone(),
            creator: i == 0,
            ..base.clone()
        };
        lobby.join(&name, config)?;
    }
    lobby.pump();

    // Leader holds every record, the others only the first half.
    for i in 0..options.peers {
        let count = if i == 0 {
            options.records
        } else {
            options.records / 2
        };
        for _ in 0..count {
            lobby.session_mut(i).pool_mut().allocate()?;
        }
    }

    println!("┌─ HEARTBEATS ─────────────────────────────────────────────────────┐");
    let mut converged_at = None;
    for tick in 1..=options.ticks {
        lobby.step_all(dt)?;

        let counts: Vec<String> = lobby
            .sessions()
            .map(|s| s.pool().allocated().to_string())
            .collect();
        let observer = lobby.session(lobby.len() - 1);
        let leader_role = lobby
            .mesh()
            .leader()
            .map_or(PeerRole::Unverified, |leader| observer.view().role(&leader));

        println!(
            "│ tick {tick:>3} │ pools [{}] │ blamelock {:<5} │ leader {:?}",
            counts.join(", "),
            observer.blamelock(),
            leader_role
        );

        if converged_at.is_none() && lobby.converged() && !observer.blamelock() {
            converged_at = Some(tick);
        }
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ RESULTS ────────────────────────────────────────────────────────┐");
    for session in lobby.sessions() {
        let stats = session.stats();
        println!(
            "│ {:<8} │ records {:>4} │ asks {:>5} │ imported {:>4} │ retried {:>3}",
            session.local_id(),
            session.pool().allocated(),
            stats.asks_issued,
            stats.records_imported,
            stats.requests_retried
        );
    }
    let mesh = lobby.mesh().stats();
    println!(
        "│ mesh: {} sent, {} dropped",
        mesh.messages_sent, mesh.messages_dropped
    );
    match converged_at {
        Some(tick) => println!("│ Status: ✓ CONVERGED at tick {tick}"),
        None => println!("│ Status: ✗ NOT CONVERGED"),
    }
    println!("└──────────────────────────────────────────────────────────────────┘");

    Ok(converged_at.is_some())
}

fn main() -> ExitCode {
    init_logging();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         MESHSYNC - LOBBY SIMULATION                              ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let Some(options) = parse_args() else {
        return ExitCode::SUCCESS;
    };

    println!("┌─ CONFIGURATION ──────────────────────────────────────────────────┐");
    println!("│ Peers:              {}", options.peers);
    println!("│ Leader Records:     {}", options.records);
    println!("│ Heartbeats:         {}", options.ticks);
    println!("│ Packet Loss:        {}%", options.loss_percent);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    match run(&options) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            tracing::error!(error = %err, "simulation failed");
            ExitCode::FAILURE
        }
    }
}
