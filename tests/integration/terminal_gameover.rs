//! Terminal suite: one-shot knockout, game-over idempotence, and rematch.
//!
//! Mewtwo's Psychic into Magikarp is lethal on the first turn. Each peer
//! must emit exactly one game-over, absorb the duplicate from the other
//! side, and a rematch must only start when both sides agree.

use peer::PeerEvent;
use pb_test_utils::{spawn_host, spawn_joiner, wait_for, RunningPeer};
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

async fn lethal_battle() -> (RunningPeer, RunningPeer) {
    let host = spawn_host(42).await;
    let joiner = spawn_joiner(host.addr).await;
    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

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
    (host, joiner)
}

/// Drain events for a while and count game-overs.
async fn game_over_count(rx: &mut broadcast::Receiver<PeerEvent>, drain: Duration) -> usize {
    let mut count = 0;
    let deadline = tokio::time::Instant::now() + drain;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return count;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(PeerEvent::GameOver { .. })) => count += 1,
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => return count,
        }
    }
}

/// S5: the knockout ends the battle once per peer with the same verdict.
#[tokio::test]
async fn one_shot_knockout_emits_game_over_once_per_peer() {
    let (host, joiner) = lethal_battle().await;
    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

    host.handle.use_move("Psychic").await.unwrap();

    let host_view = wait_for(&mut host_events, WAIT, |e| {
        matches!(e, PeerEvent::GameOver { .. })
    })
    .await;
    let joiner_view = wait_for(&mut joiner_events, WAIT, |e| {
        matches!(e, PeerEvent::GameOver { .. })
    })
    .await;

    for view in [host_view, joiner_view] {
        match view {
            PeerEvent::GameOver { winner, loser } => {
                assert_eq!(winner, "Mewtwo");
                assert_eq!(loser, "Magikarp");
            }
            _ => unreachable!(),
        }
    }

    // The opposite peer's GAME_OVER frame and any retransmits of it must be
    // absorbed: no second event on either side.
    assert_eq!(game_over_count(&mut host_events, Duration::from_millis(400)).await, 0);
    assert_eq!(game_over_count(&mut joiner_events, Duration::from_millis(400)).await, 0);
}

/// Both peers agreeing restarts the session into a fresh battle.
#[tokio::test]
async fn rematch_requires_both_and_resets_the_battle() {
    let (host, joiner) = lethal_battle().await;
    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

    host.handle.use_move("Psychic").await.unwrap();
    wait_for(&mut host_events, WAIT, |e| matches!(e, PeerEvent::GameOver { .. })).await;
    wait_for(&mut joiner_events, WAIT, |e| matches!(e, PeerEvent::GameOver { .. })).await;

    // One yes is not enough; the host must not see agreement yet.
    joiner.handle.request_rematch(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    host.handle.request_rematch(true).await.unwrap();

    wait_for(&mut host_events, WAIT, |e| matches!(e, PeerEvent::RematchAgreed)).await;
    wait_for(&mut joiner_events, WAIT, |e| matches!(e, PeerEvent::RematchAgreed)).await;

    // The reset session supports a whole new battle.
    host.handle.start_battle("Pikachu", 5, 5).await.unwrap();
    joiner.handle.start_battle("Charmander", 5, 5).await.unwrap();
    wait_for(&mut host_events, WAIT, |e| {
        matches!(e, PeerEvent::BattleUpdate(t) if t.contains("Opponent chose Charmander"))
    })
    .await;

    host.handle.use_move("Thunder Shock").await.unwrap();
    wait_for(&mut host_events, WAIT, |e| matches!(e, PeerEvent::TurnResolved { .. })).await;
    wait_for(&mut joiner_events, WAIT, |e| matches!(e, PeerEvent::TurnResolved { .. })).await;
}

/// A decline ends the session on both sides.
#[tokio::test]
async fn rematch_decline_terminates_the_session() {
    let (host, joiner) = lethal_battle().await;
    let mut host_events = host.events();
    let mut joiner_events = joiner.events();

    host.handle.use_move("Psychic").await.unwrap();
    wait_for(&mut host_events, WAIT, |e| matches!(e, PeerEvent::GameOver { .. })).await;
    wait_for(&mut joiner_events, WAIT, |e| matches!(e, PeerEvent::GameOver { .. })).await;

    host.handle.request_rematch(true).await.unwrap();
    joiner.handle.request_rematch(false).await.unwrap();

    wait_for(&mut host_events, WAIT, |e| matches!(e, PeerEvent::Disconnected)).await;
    wait_for(&mut joiner_events, WAIT, |e| matches!(e, PeerEvent::Disconnected)).await;
}
