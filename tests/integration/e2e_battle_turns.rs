//! Battle turn suite: the four-phase handshake over real sockets.
//!
//! Seed 42, Pikachu vs Charmander. Both peers must compute identical damage
//! each turn, the confirm must be exchanged, and turn ownership must
//! alternate.

use peer::PeerEvent;
use pb_engine::{DamageCalculator, DEFAULT_LEVEL};
use pb_test_utils::{
    next_turn_resolved, spawn_host, spawn_joiner, test_creatures, test_moves, wait_for,
};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn setup_battle() -> (pb_test_utils::RunningPeer, pb_test_utils::RunningPeer) {
    let host = spawn_host(42).await;
    let joiner = spawn_joiner(host.addr).await;
    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

    host.handle.start_battle("Pikachu", 5, 5).await.unwrap();
    joiner.handle.start_battle("Charmander", 5, 5).await.unwrap();

    // Both sides must see the opponent's selection before moving.
    wait_for(&mut host_events, WAIT, |e| {
        matches!(e, PeerEvent::BattleUpdate(t) if t.contains("Opponent chose Charmander"))
    })
    .await;
    wait_for(&mut joiner_events, WAIT, |e| {
        matches!(e, PeerEvent::BattleUpdate(t) if t.contains("Opponent chose Pikachu"))
    })
    .await;
    (host, joiner)
}

/// S2: one turn of Thunderbolt. Both peers agree bit-for-bit with a locally
/// seeded calculator, the defender HP is `max(0, 39 - damage)`, and the
/// turn flips to the joiner.
#[tokio::test]
async fn single_turn_agrees_on_both_sides() {
    let (host, joiner) = setup_battle().await;
    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

    host.handle.use_move("Thunderbolt").await.unwrap();

    let host_turn = next_turn_resolved(&mut host_events, WAIT).await;
    let joiner_turn = next_turn_resolved(&mut joiner_events, WAIT).await;

    assert_eq!(host_turn.attacker, "Pikachu");
    assert_eq!(host_turn.damage_dealt, joiner_turn.damage_dealt);
    assert_eq!(
        host_turn.defender_hp_remaining,
        joiner_turn.defender_hp_remaining
    );
    assert_eq!(
        host_turn.defender_hp_remaining,
        (39 - host_turn.damage_dealt).max(0)
    );

    // The wire result must equal a local calculator run with the same seed.
    let creatures = test_creatures();
    let moves = test_moves();
    let mut reference = DamageCalculator::new(creatures.clone(), 42);
    let expected = reference.calculate_turn_outcome(
        creatures.get("Pikachu").unwrap(),
        creatures.get("Charmander").unwrap(),
        39,
        moves.get("Thunderbolt").unwrap(),
        DEFAULT_LEVEL,
        false,
        false,
    );
    assert_eq!(host_turn.damage_dealt, expected.damage_dealt);
    assert_eq!(host_turn.defender_hp_remaining, expected.defender_hp_remaining);
    assert_eq!(host_turn.status_message, expected.status_message);
}

/// Turn ownership alternates: after the host's turn resolves, the joiner
/// may move and the host may not.
#[tokio::test]
async fn turn_ownership_alternates() {
    let (host, joiner) = setup_battle().await;
    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

    // Weak moves so nobody faints during this test.
    host.handle.use_move("Thunder Shock").await.unwrap();
    let first_host = next_turn_resolved(&mut host_events, WAIT).await;
    let first_joiner = next_turn_resolved(&mut joiner_events, WAIT).await;
    assert_eq!(first_host.attacker, "Pikachu");
    assert_eq!(first_host.damage_dealt, first_joiner.damage_dealt);

    // Host moving again out of turn is rejected with a warning.
    host.handle.use_move("Thunder Shock").await.unwrap();
    wait_for(&mut host_events, WAIT, |e| {
        matches!(e, PeerEvent::Warning(t) if t.contains("not your turn"))
    })
    .await;

    // The joiner holds the turn now.
    joiner.handle.use_move("Ember").await.unwrap();
    let second_host = next_turn_resolved(&mut host_events, WAIT).await;
    let second_joiner = next_turn_resolved(&mut joiner_events, WAIT).await;
    assert_eq!(second_host.attacker, "Charmander");
    assert_eq!(second_host.damage_dealt, second_joiner.damage_dealt);
    assert_eq!(
        second_host.defender_hp_remaining,
        second_joiner.defender_hp_remaining
    );
}

/// A battle driven to completion: alternate weak moves until one side
/// faints; both peers converge on the same game-over outcome.
#[tokio::test]
async fn battle_runs_to_game_over() {
    let (host, joiner) = setup_battle().await;
    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

    let mut host_moves = true;
    let (winner, loser) = loop {
        if host_moves {
            host.handle.use_move("Thunder Shock").await.unwrap();
        } else {
            joiner.handle.use_move("Ember").await.unwrap();
        }
        host_moves = !host_moves;

        let event = wait_for(&mut host_events, WAIT, |e| {
            matches!(
                e,
                PeerEvent::TurnResolved { .. } | PeerEvent::GameOver { .. }
            )
        })
        .await;
        if let PeerEvent::GameOver { winner, loser } = event {
            break (winner, loser);
        }
    };

    let joiner_view = wait_for(&mut joiner_events, WAIT, |e| {
        matches!(e, PeerEvent::GameOver { .. })
    })
    .await;
    match joiner_view {
        PeerEvent::GameOver {
            winner: jw,
            loser: jl,
        } => {
            assert_eq!(jw, winner);
            assert_eq!(jl, loser);
        }
        _ => unreachable!(),
    }
    assert_ne!(winner, loser);
}
