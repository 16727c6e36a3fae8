//! Resolution suite: a forced calculation mismatch converges on the host's
//! numbers.
//!
//! The joiner is misconfigured with a different battle level, so its damage
//! formula disagrees every turn. The host must detect the mismatch, send a
//! resolution request with its own values, and both sides must end the turn
//! with identical defender HP. Last-writer-wins, host writes last.

use peer::config::PeerRole;
use peer::PeerEvent;
use pb_test_utils::{
    fast_config, next_turn_resolved, spawn_host, spawn_joiner_with, wait_for,
};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn mismatch_converges_on_host_values() {
    let host = spawn_host(42).await;
    // Level skew forces a deterministic disagreement on every calculation.
    let mut joiner_cfg = fast_config(PeerRole::Joiner);
    joiner_cfg.level = 80;
    let joiner = spawn_joiner_with(joiner_cfg, host.addr).await;

    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

    host.handle.start_battle("Pikachu", 5, 5).await.unwrap();
    joiner.handle.start_battle("Charmander", 5, 5).await.unwrap();
    wait_for(&mut host_events, WAIT, |e| {
        matches!(e, PeerEvent::BattleUpdate(t) if t.contains("Opponent chose"))
    })
    .await;
    wait_for(&mut joiner_events, WAIT, |e| {
        matches!(e, PeerEvent::BattleUpdate(t) if t.contains("Opponent chose"))
    })
    .await;

    host.handle.use_move("Thunder Shock").await.unwrap();

    let host_turn = next_turn_resolved(&mut host_events, WAIT).await;
    let joiner_turn = next_turn_resolved(&mut joiner_events, WAIT).await;

    // The joiner adopted the host's values wholesale.
    assert_eq!(host_turn.damage_dealt, joiner_turn.damage_dealt);
    assert_eq!(
        host_turn.defender_hp_remaining,
        joiner_turn.defender_hp_remaining
    );
    assert_eq!(host_turn.attacker, "Pikachu");
    assert_eq!(joiner_turn.attacker, "Pikachu");

    // Convergence holds across a reply turn as well.
    joiner.handle.use_move("Ember").await.unwrap();
    let host_second = next_turn_resolved(&mut host_events, WAIT).await;
    let joiner_second = next_turn_resolved(&mut joiner_events, WAIT).await;
    assert_eq!(host_second.damage_dealt, joiner_second.damage_dealt);
    assert_eq!(
        host_second.defender_hp_remaining,
        joiner_second.defender_hp_remaining
    );
}
