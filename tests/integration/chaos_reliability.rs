//! Chaos suite: a deterministically lossy link between joiner and host.
//!
//! All joiner<->host traffic crosses a relay that drops 3 of every 10
//! datagrams (both directions share the counter). Across ten turns every
//! turn must still settle through its confirm, and no calculation may be
//! applied twice: each peer's HP trajectory must match the reported damage
//! exactly.

use peer::config::PeerRole;
use peer::PeerEvent;
use pb_test_utils::{
    fast_config, next_turn_resolved, spawn_joiner_with, spawn_lossy_relay,
    thirty_percent_pattern, wait_for,
};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(20);
const TURNS: usize = 10;

#[tokio::test]
async fn ten_turns_complete_over_a_lossy_link() {
    // More retries than the default on both sides: the link is hostile by
    // construction.
    let mut host_cfg = fast_config(PeerRole::Host);
    host_cfg.seed = Some(42);
    host_cfg.reliability.max_retries = 8;
    host_cfg.reliability.timeout = Duration::from_millis(50);
    let host = pb_test_utils::spawn_host_with(host_cfg).await;
    let relay = spawn_lossy_relay(host.addr, thirty_percent_pattern()).await;

    let mut joiner_cfg = fast_config(PeerRole::Joiner);
    joiner_cfg.reliability.max_retries = 8;
    joiner_cfg.reliability.timeout = Duration::from_millis(50);
    let joiner = spawn_joiner_with(joiner_cfg, relay).await;
    assert_eq!(joiner.seed, Some(42));

    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

    // Walls: ten turns of weak special moves cannot knock either out.
    host.handle.start_battle("Snorlax", 5, 5).await.unwrap();
    joiner.handle.start_battle("Blissey", 5, 5).await.unwrap();
    wait_for(&mut host_events, WAIT, |e| {
        matches!(e, PeerEvent::BattleUpdate(t) if t.contains("Opponent chose Blissey"))
    })
    .await;
    wait_for(&mut joiner_events, WAIT, |e| {
        matches!(e, PeerEvent::BattleUpdate(t) if t.contains("Opponent chose Snorlax"))
    })
    .await;

    let mut snorlax_hp = 160;
    let mut blissey_hp = 255;
    let mut host_moves = true;

    for turn in 0..TURNS {
        if host_moves {
            host.handle.use_move("Mud Slap").await.unwrap();
        } else {
            joiner.handle.use_move("Mud Slap").await.unwrap();
        }

        let host_view = next_turn_resolved(&mut host_events, WAIT).await;
        let joiner_view = next_turn_resolved(&mut joiner_events, WAIT).await;

        // Agreement across the lossy link.
        assert_eq!(
            host_view.damage_dealt, joiner_view.damage_dealt,
            "turn {turn}: damage diverged"
        );
        assert_eq!(
            host_view.defender_hp_remaining, joiner_view.defender_hp_remaining,
            "turn {turn}: defender HP diverged"
        );

        // No double-application: HP must fall by exactly the reported
        // damage, once.
        if host_moves {
            assert_eq!(host_view.attacker, "Snorlax", "turn {turn}");
            blissey_hp = (blissey_hp - host_view.damage_dealt).max(0);
            assert_eq!(host_view.defender_hp_remaining, blissey_hp, "turn {turn}");
        } else {
            assert_eq!(host_view.attacker, "Blissey", "turn {turn}");
            snorlax_hp = (snorlax_hp - host_view.damage_dealt).max(0);
            assert_eq!(host_view.defender_hp_remaining, snorlax_hp, "turn {turn}");
        }
        assert!(snorlax_hp > 0 && blissey_hp > 0, "walls must survive");
        host_moves = !host_moves;
    }
}
