//! Handshake suite: joiner and spectator connection establishment.
//!
//! A host on an ephemeral port accepts a joiner's handshake request and
//! replies with the battle seed; both endpoints report connected. Failed
//! connects surface as errors with no partial state.

use peer::config::PeerRole;
use peer::{Endpoint, PeerError, PeerEvent};
use pb_test_utils::{fast_config, spawn_host, spawn_joiner, test_creatures, test_moves, wait_for};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// The joiner receives a positive seed and the host observes the connection.
#[tokio::test]
async fn joiner_handshake_shares_the_seed() {
    let host = spawn_host(42).await;
    let mut host_events = host.events();

    let joiner = spawn_joiner(host.addr).await;
    assert_eq!(joiner.seed, Some(42), "joiner adopted the host seed");
    assert!(joiner.seed.unwrap() > 0);

    let event = wait_for(&mut host_events, WAIT, |e| {
        matches!(e, PeerEvent::Connected { .. })
    })
    .await;
    match event {
        PeerEvent::Connected { seed } => assert_eq!(seed, 42),
        _ => unreachable!(),
    }
}

/// Without a fixed seed the host draws one in 1..=99999.
#[tokio::test]
async fn random_seed_is_positive() {
    let mut cfg = fast_config(PeerRole::Host);
    cfg.seed = None;
    let host = pb_test_utils::spawn_host_with(cfg).await;

    let joiner = spawn_joiner(host.addr).await;
    let seed = joiner.seed.unwrap();
    assert!(seed >= 1, "seed must be positive, got {seed}");
    assert!(seed <= 99_999);
}

/// A spectator request is also answered with the current seed.
#[tokio::test]
async fn spectator_handshake_succeeds() {
    let host = spawn_host(7).await;
    let mut host_events = host.events();

    // Attach before any joiner: the seed is still unset, so 0 is returned.
    let early = pb_test_utils::spawn_spectator(host.addr).await;
    assert_eq!(early.seed, Some(0));
    wait_for(&mut host_events, WAIT, |e| {
        matches!(e, PeerEvent::SpectatorJoined { .. })
    })
    .await;

    // After the joiner handshake, spectators get the real seed.
    let _joiner = spawn_joiner(host.addr).await;
    let late = pb_test_utils::spawn_spectator(host.addr).await;
    assert_eq!(late.seed, Some(7));
}

/// Connecting to a dead address times out with a connect error and leaves
/// no connection state behind.
#[tokio::test]
async fn connect_timeout_propagates() {
    let mut cfg = fast_config(PeerRole::Joiner);
    cfg.connect_timeout = Duration::from_millis(300);
    // An address nothing listens on.
    cfg.host_addr = Some("127.0.0.1:1".to_owned());

    let (mut endpoint, _handle) = Endpoint::new(&cfg, test_creatures(), test_moves())
        .await
        .expect("bind");
    let err = endpoint.connect().await.expect_err("must time out");
    assert!(matches!(err, PeerError::Connect(_)), "got {err:?}");
    assert!(!endpoint.is_connected());
}
