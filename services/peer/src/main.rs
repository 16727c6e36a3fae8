// peer: run one PokéProtocol endpoint (host, joiner, or spectator).
//
// The interactive battle/chat front-ends live outside this binary; it wires
// config to an endpoint and prints the event stream until Ctrl-C.

use clap::Parser;
use peer::config::{self, PeerConfig, PeerRole};
use peer::{Endpoint, PeerEvent};
use pb_data::{CreatureStore, MoveStore};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "peer", about = "PokéProtocol battle endpoint")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// Role override: host, joiner, or spectator.
    #[arg(long)]
    role: Option<String>,
    /// Host address override for joiner/spectator roles.
    #[arg(long)]
    host_addr: Option<String>,
    /// Bind port override.
    #[arg(long)]
    port: Option<u16>,
    /// Creature CSV override.
    #[arg(long)]
    creature_csv: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = match build_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };
    info!(role = ?cfg.role, port = cfg.bind_port, "peer starting");

    let creatures = match &cfg.creature_csv {
        Some(path) => match CreatureStore::from_csv_path(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("FATAL: failed to load creature data: {e}");
                std::process::exit(1);
            }
        },
        None => {
            eprintln!("FATAL: creature_csv is required (config file or --creature-csv)");
            std::process::exit(1);
        }
    };
    let moves = Arc::new(MoveStore::builtin());

    let (mut endpoint, handle) = match Endpoint::new(&cfg, creatures, moves).await {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    if cfg.role != PeerRole::Host {
        match endpoint.connect().await {
            Ok(seed) => info!(seed, "connected to host"),
            Err(e) => {
                eprintln!("FATAL: {e}");
                std::process::exit(1);
            }
        }
    }

    let mut events = handle.events();
    let runner = tokio::spawn(endpoint.run());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("signal received, disconnecting");
                let _ = handle.disconnect().await;
                break;
            }
            event = events.recv() => match event {
                Ok(PeerEvent::Disconnected) | Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    eprintln!("[events lagged, {missed} missed]");
                }
            },
        }
    }

    let _ = runner.await;
}

fn build_config(args: &Args) -> Result<PeerConfig, String> {
    let mut cfg = match &args.config {
        Some(path) => config::load_config(path).map_err(|e| e.to_string())?,
        None => PeerConfig::default(),
    };
    if let Some(role) = &args.role {
        cfg.role = match role.as_str() {
            "host" => PeerRole::Host,
            "joiner" => PeerRole::Joiner,
            "spectator" => PeerRole::Spectator,
            other => return Err(format!("unknown role: {other}")),
        };
        if args.port.is_none() && args.config.is_none() {
            cfg.bind_port = cfg.role.default_port();
        }
    }
    if let Some(addr) = &args.host_addr {
        cfg.host_addr = Some(addr.clone());
    }
    if let Some(port) = args.port {
        cfg.bind_port = port;
    }
    if let Some(path) = &args.creature_csv {
        cfg.creature_csv = Some(path.clone());
    }
    if cfg.role != PeerRole::Host && cfg.host_addr.is_none() {
        return Err("joiner/spectator roles require --host-addr".to_owned());
    }
    Ok(cfg)
}

fn print_event(event: &PeerEvent) {
    match event {
        PeerEvent::Connected { seed } => println!("[connected, seed {seed}]"),
        PeerEvent::SpectatorJoined { addr } => println!("[spectator joined: {addr}]"),
        PeerEvent::BattleUpdate(text) => println!("{text}"),
        PeerEvent::TurnResolved { record } => println!(
            "[turn resolved: {} dealt {}, defender at {}]",
            record.attacker, record.damage_dealt, record.defender_hp_remaining
        ),
        PeerEvent::Chat { sender, text } => println!("<{sender}> {text}"),
        PeerEvent::Sticker { sender, .. } => println!("<{sender}> sent a sticker"),
        PeerEvent::GameOver { winner, loser } => {
            println!("[game over: {winner} defeats {loser}]");
        }
        PeerEvent::RematchAgreed => println!("[rematch agreed]"),
        PeerEvent::Warning(text) => eprintln!("[warn] {text}"),
        PeerEvent::Disconnected => println!("[disconnected]"),
    }
}
