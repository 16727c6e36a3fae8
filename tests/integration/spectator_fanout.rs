//! Spectator suite: host-side fan-out and chat reflection.
//!
//! Two spectators attach to a host before the battle. Every battle-relevant
//! frame on the host<->joiner channel must reach both spectators exactly
//! once, and a chat message from the joiner must appear at the host and at
//! both spectators exactly once.

use peer::PeerEvent;
use pb_test_utils::{spawn_host, spawn_joiner, spawn_spectator, wait_for};
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

/// Drain all buffered events for `drain`, returning them in order.
async fn drain_events(
    rx: &mut broadcast::Receiver<PeerEvent>,
    drain: Duration,
) -> Vec<PeerEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + drain;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return events;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) => events.push(event),
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return events,
        }
    }
}

fn count_updates(events: &[PeerEvent], needle: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PeerEvent::BattleUpdate(t) if t.contains(needle)))
        .count()
}

#[tokio::test]
async fn spectators_observe_the_whole_battle_exactly_once() {
    let host = spawn_host(42).await;
    let spec_a = spawn_spectator(host.addr).await;
    let spec_b = spawn_spectator(host.addr).await;
    let joiner = spawn_joiner(host.addr).await;

    let mut host_events = host.events();
    let mut joiner_events = joiner.events();
    let mut a_events = spec_a.events();
    let mut b_events = spec_b.events();

    host.handle.start_battle("Mewtwo", 5, 5).await.unwrap();
    joiner.handle.start_battle("Magikarp", 5, 5).await.unwrap();
    wait_for(&mut host_events, WAIT, |e| {
        matches!(e, PeerEvent::BattleUpdate(t) if t.contains("Opponent chose Magikarp"))
    })
    .await;
    wait_for(&mut joiner_events, WAIT, |e| {
        matches!(e, PeerEvent::BattleUpdate(t) if t.contains("Opponent chose Mewtwo"))
    })
    .await;

    // A lethal turn produces announce, defense, two reports, and game over.
    host.handle.use_move("Psychic").await.unwrap();
    wait_for(&mut host_events, WAIT, |e| matches!(e, PeerEvent::GameOver { .. })).await;

    for (name, events) in [
        ("spectator A", drain_events(&mut a_events, Duration::from_millis(600)).await),
        ("spectator B", drain_events(&mut b_events, Duration::from_millis(600)).await),
    ] {
        // Both setups, in either order.
        assert_eq!(
            count_updates(&events, "Battle starting: Mewtwo"),
            1,
            "{name}: host setup"
        );
        assert_eq!(
            count_updates(&events, "Battle starting: Magikarp"),
            1,
            "{name}: joiner setup"
        );
        // The turn itself.
        assert_eq!(
            count_updates(&events, "Attack announced: Psychic"),
            1,
            "{name}: attack announce"
        );
        // One calculation report per peer, with matching numbers.
        assert_eq!(
            count_updates(&events, "Mewtwo used Psychic!"),
            2,
            "{name}: both calculation reports"
        );
        // Game over from the host channel.
        let game_overs = events
            .iter()
            .filter(|e| matches!(e, PeerEvent::GameOver { .. }))
            .count();
        assert_eq!(game_overs, 1, "{name}: game over");
    }
}

#[tokio::test]
async fn joiner_chat_reaches_host_and_every_spectator_once() {
    let host = spawn_host(42).await;
    let spec_a = spawn_spectator(host.addr).await;
    let spec_b = spawn_spectator(host.addr).await;
    let joiner = spawn_joiner(host.addr).await;

    let mut host_events = host.events();
    let mut a_events = spec_a.events();
    let mut b_events = spec_b.events();

    joiner.handle.send_chat("Misty", "brock pls").await.unwrap();

    for (name, rx) in [
        ("host", &mut host_events),
        ("spectator A", &mut a_events),
        ("spectator B", &mut b_events),
    ] {
        let event = wait_for(rx, WAIT, |e| matches!(e, PeerEvent::Chat { .. })).await;
        match event {
            PeerEvent::Chat { sender, text } => {
                assert_eq!(sender, "Misty", "{name}");
                assert_eq!(text, "brock pls", "{name}");
            }
            _ => unreachable!(),
        }
        // Exactly once: no further chat in the drain window.
        let extra = drain_events(rx, Duration::from_millis(400))
            .await
            .into_iter()
            .filter(|e| matches!(e, PeerEvent::Chat { .. }))
            .count();
        assert_eq!(extra, 0, "{name}: duplicate chat delivery");
    }
}

#[tokio::test]
async fn spectator_chat_reflects_to_joiner_and_other_spectators() {
    let host = spawn_host(42).await;
    let spec_a = spawn_spectator(host.addr).await;
    let spec_b = spawn_spectator(host.addr).await;
    let joiner = spawn_joiner(host.addr).await;

    let mut joiner_events = joiner.events();
    let mut a_events = spec_a.events();
    let mut b_events = spec_b.events();

    spec_a.handle.send_chat("RailFan", "go magikarp").await.unwrap();

    for (name, rx) in [("joiner", &mut joiner_events), ("spectator B", &mut b_events)] {
        let event = wait_for(rx, WAIT, |e| matches!(e, PeerEvent::Chat { .. })).await;
        match event {
            PeerEvent::Chat { sender, text } => {
                assert_eq!(sender, "RailFan", "{name}");
                assert_eq!(text, "go magikarp", "{name}");
            }
            _ => unreachable!(),
        }
    }

    // The originator must not get its own message reflected back.
    let echoes = drain_events(&mut a_events, Duration::from_millis(400))
        .await
        .into_iter()
        .filter(|e| matches!(e, PeerEvent::Chat { .. }))
        .count();
    assert_eq!(echoes, 0, "originating spectator must not hear itself");
}
