// pb-test-utils: shared harness for the endpoint integration suites.
//
// Provides fixture creature rosters, fast-timer peer configs, helpers that
// spawn connected in-process endpoints on ephemeral ports, and a lossy UDP
// relay for chaos testing.

use peer::config::{PeerConfig, PeerRole, ReliabilityConfig};
use peer::{Endpoint, PeerEvent, PeerHandle};
use pb_data::{Creature, CreatureStore, MoveStore};
use pb_engine::CalcRecord;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Fixture data
// ---------------------------------------------------------------------------

fn fixture(
    name: &str,
    stats: [i32; 6],
    type1: &str,
    reactions: &[(&str, f64)],
) -> Creature {
    Creature {
        name: name.to_owned(),
        hp: stats[0],
        attack: stats[1],
        defense: stats[2],
        sp_attack: stats[3],
        sp_defense: stats[4],
        speed: stats[5],
        type1: type1.to_owned(),
        type2: None,
        effectiveness: reactions
            .iter()
            .map(|(t, m)| ((*t).to_owned(), *m))
            .collect::<HashMap<_, _>>(),
    }
}

/// The standard test roster: Pikachu, Charmander, Mewtwo, Magikarp.
pub fn test_creatures() -> Arc<CreatureStore> {
    Arc::new(CreatureStore::from_records([
        fixture(
            "Pikachu",
            [35, 55, 40, 50, 50, 90],
            "electric",
            &[("ground", 2.0), ("electric", 0.5), ("flying", 0.5), ("fire", 1.0)],
        ),
        fixture(
            "Charmander",
            [39, 52, 43, 60, 50, 65],
            "fire",
            &[("water", 2.0), ("ground", 2.0), ("fire", 0.5), ("electric", 1.0)],
        ),
        fixture(
            "Mewtwo",
            [106, 110, 90, 154, 90, 130],
            "psychic",
            &[("bug", 2.0), ("ghost", 2.0), ("psychic", 0.5), ("fighting", 0.5)],
        ),
        fixture(
            "Magikarp",
            [20, 10, 55, 15, 20, 80],
            "water",
            &[("electric", 2.0), ("grass", 2.0), ("fire", 0.5), ("psychic", 1.0)],
        ),
        // Walls for long battles in the reliability suites.
        fixture(
            "Snorlax",
            [160, 110, 65, 65, 110, 30],
            "normal",
            &[("fighting", 2.0), ("ghost", 0.0), ("ground", 1.0)],
        ),
        fixture(
            "Blissey",
            [255, 10, 10, 75, 135, 55],
            "normal",
            &[("fighting", 2.0), ("ghost", 0.0), ("ground", 1.0)],
        ),
    ]))
}

pub fn test_moves() -> Arc<MoveStore> {
    Arc::new(MoveStore::builtin())
}

/// A peer config with an ephemeral port and fast reliability timers so the
/// suites finish quickly.
pub fn fast_config(role: PeerRole) -> PeerConfig {
    let mut cfg = PeerConfig::for_role(role);
    cfg.bind_port = 0;
    cfg.reliability = ReliabilityConfig {
        timeout: Duration::from_millis(60),
        max_retries: 3,
        tick: Duration::from_millis(20),
    };
    cfg.connect_timeout = Duration::from_secs(3);
    cfg
}

// ---------------------------------------------------------------------------
// Running peers
// ---------------------------------------------------------------------------

/// A spawned endpoint: its handle, reachable address, and (for joiners and
/// spectators) the seed obtained during connect.
pub struct RunningPeer {
    pub handle: PeerHandle,
    pub addr: SocketAddr,
    pub seed: Option<u32>,
}

impl RunningPeer {
    pub fn events(&self) -> broadcast::Receiver<PeerEvent> {
        self.handle.events()
    }
}

fn reachable(handle: &PeerHandle) -> SocketAddr {
    format!("127.0.0.1:{}", handle.local_addr().port())
        .parse()
        .expect("loopback address")
}

/// Spawn a host with a fixed seed.
pub async fn spawn_host(seed: u32) -> RunningPeer {
    let mut cfg = fast_config(PeerRole::Host);
    cfg.seed = Some(seed);
    spawn_host_with(cfg).await
}

pub async fn spawn_host_with(cfg: PeerConfig) -> RunningPeer {
    let (endpoint, handle) = Endpoint::new(&cfg, test_creatures(), test_moves())
        .await
        .expect("host bind");
    let addr = reachable(&handle);
    tokio::spawn(endpoint.run());
    RunningPeer {
        handle,
        addr,
        seed: None,
    }
}

/// Spawn a joiner and complete the handshake against `host_addr`.
pub async fn spawn_joiner(host_addr: SocketAddr) -> RunningPeer {
    spawn_joiner_with(fast_config(PeerRole::Joiner), host_addr).await
}

pub async fn spawn_joiner_with(mut cfg: PeerConfig, host_addr: SocketAddr) -> RunningPeer {
    cfg.host_addr = Some(host_addr.to_string());
    let (mut endpoint, handle) = Endpoint::new(&cfg, test_creatures(), test_moves())
        .await
        .expect("joiner bind");
    let seed = endpoint.connect().await.expect("joiner handshake");
    let addr = reachable(&handle);
    tokio::spawn(endpoint.run());
    RunningPeer {
        handle,
        addr,
        seed: Some(seed),
    }
}

/// Spawn a spectator attached to `host_addr`.
pub async fn spawn_spectator(host_addr: SocketAddr) -> RunningPeer {
    let mut cfg = fast_config(PeerRole::Spectator);
    cfg.host_addr = Some(host_addr.to_string());
    let (mut endpoint, handle) = Endpoint::new(&cfg, test_creatures(), test_moves())
        .await
        .expect("spectator bind");
    let seed = endpoint.connect().await.expect("spectator handshake");
    let addr = reachable(&handle);
    tokio::spawn(endpoint.run());
    RunningPeer {
        handle,
        addr,
        seed: Some(seed),
    }
}

// ---------------------------------------------------------------------------
// Event helpers
// ---------------------------------------------------------------------------

/// Await the first event matching `pred`, panicking after `timeout`.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<PeerEvent>,
    timeout: Duration,
    mut pred: impl FnMut(&PeerEvent) -> bool,
) -> PeerEvent {
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Await the next `TurnResolved` event and return its record.
pub async fn next_turn_resolved(
    rx: &mut broadcast::Receiver<PeerEvent>,
    timeout: Duration,
) -> CalcRecord {
    match wait_for(rx, timeout, |e| matches!(e, PeerEvent::TurnResolved { .. })).await {
        PeerEvent::TurnResolved { record } => record,
        _ => unreachable!(),
    }
}

// ---------------------------------------------------------------------------
// Lossy relay
// ---------------------------------------------------------------------------

/// A deterministic 30% drop cycle (3 of every 10 datagrams).
pub fn thirty_percent_pattern() -> Vec<bool> {
    vec![
        true, false, false, true, false, false, false, true, false, false,
    ]
}

/// Spawn a UDP relay that forwards between one client and `target`,
/// dropping datagrams according to the repeating `pattern` (both
/// directions share the counter). Returns the relay's address; point the
/// client at it instead of at `target`.
pub async fn spawn_lossy_relay(target: SocketAddr, pattern: Vec<bool>) -> SocketAddr {
    assert!(!pattern.is_empty(), "drop pattern must not be empty");
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("relay bind");
    let addr = socket.local_addr().expect("relay addr");

    tokio::spawn(async move {
        let mut client: Option<SocketAddr> = None;
        let mut buf = vec![0u8; 4096];
        let mut counter = 0usize;
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let dropped = pattern[counter % pattern.len()];
            counter += 1;
            if dropped {
                continue;
            }
            if from == target {
                if let Some(client) = client {
                    let _ = socket.send_to(&buf[..n], client).await;
                }
            } else {
                client = Some(from);
                let _ = socket.send_to(&buf[..n], target).await;
            }
        }
    });
    addr
}
