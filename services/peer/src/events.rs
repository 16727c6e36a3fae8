//! Typed events emitted by an endpoint.
//!
//! Embedders subscribe via [`crate::PeerHandle::events`]; the stream replaces
//! ad-hoc UI callbacks so the core never calls into foreign code.

use pb_engine::CalcRecord;
use std::net::SocketAddr;

/// Everything an embedder can observe about a running endpoint.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Handshake completed; both sides now share this damage seed.
    Connected { seed: u32 },
    /// A spectator attached to this host.
    SpectatorJoined { addr: SocketAddr },
    /// Human-readable battle narration (setup, announcements, status lines).
    BattleUpdate(String),
    /// A turn settled with both peers in agreement (or after resolution).
    TurnResolved { record: CalcRecord },
    /// Text chat from a participant.
    Chat { sender: String, text: String },
    /// Sticker chat; `data` is the validated base64 payload.
    Sticker { sender: String, data: String },
    /// The battle ended.
    GameOver { winner: String, loser: String },
    /// Both sides agreed to a rematch; a fresh battle setup may begin.
    RematchAgreed,
    /// Non-fatal trouble worth surfacing (retry exhaustion, bad commands).
    Warning(String),
    /// The endpoint shut down or the session was abandoned.
    Disconnected,
}
