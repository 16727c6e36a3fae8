//! Spectator fan-out: the host-side mirror sink.
//!
//! Mirroring is a pipeline stage rather than ad-hoc calls inside each
//! handler: every peer-bound battle frame and every inbound one passes
//! through the same classification, so a handler cannot forget to mirror.
//! Each mirrored copy is freshly sequenced per spectator by the send path.

use pb_protocol::Message;
use std::net::SocketAddr;

/// Battle frames spectators receive a copy of. Chat follows its own
/// reflection rules and ACKs stay point-to-point.
pub fn mirrors_to_spectators(msg: &Message) -> bool {
    matches!(
        msg,
        Message::BattleSetup(_)
            | Message::AttackAnnounce(_)
            | Message::DefenseAnnounce(_)
            | Message::CalculationReport(_)
            | Message::GameOver(_)
            | Message::RematchRequest(_)
    )
}

/// Ordered, deduplicated set of spectator addresses.
#[derive(Debug, Default)]
pub struct SpectatorRoster {
    addrs: Vec<SocketAddr>,
}

impl SpectatorRoster {
    /// Append a spectator; returns false if it was already present.
    pub fn add(&mut self, addr: SocketAddr) -> bool {
        if self.addrs.contains(&addr) {
            return false;
        }
        self.addrs.push(addr);
        true
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.addrs.contains(&addr)
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// All spectators, in join order.
    pub fn iter(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.addrs.iter().copied()
    }

    /// All spectators except `excluded` (the originator of a reflected
    /// chat message).
    pub fn iter_except(&self, excluded: SocketAddr) -> impl Iterator<Item = SocketAddr> + '_ {
        self.addrs.iter().copied().filter(move |&a| a != excluded)
    }
}
