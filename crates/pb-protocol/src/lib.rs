// pb-protocol: PokéProtocol wire message types and the text-frame codec.
//
// One message = one datagram. The payload is UTF-8 text: newline-separated
// `key: value` lines with a trailing newline, and the first serialized line
// is always `message_type: <TAG>`. Parsing is order-insensitive beyond that;
// unknown keys and surrounding whitespace are ignored, and each line splits
// on its FIRST colon only. Nested values (the creature snapshot and the
// stat-boost dictionary in battle setup) are embedded as single-line JSON.
//
// The enum variants map 1:1 to the frozen message tags; the frame layouts
// are part of the protocol and bit-exact for interop.

use pb_data::Creature;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Largest frame the protocol permits on the wire.
pub const MAX_FRAME: usize = 4096;

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Boost charge counts exchanged in battle setup, embedded as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBoosts {
    pub special_attack_uses: i32,
    pub special_defense_uses: i32,
}

impl Default for StatBoosts {
    fn default() -> Self {
        StatBoosts {
            special_attack_uses: 5,
            special_defense_uses: 5,
        }
    }
}

/// Chat payload discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Text,
    Sticker,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "TEXT",
            ContentType::Sticker => "STICKER",
        }
    }
}

/// Stat boost selector carried by the reserved boost-activation opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostType {
    SpecialAttack,
    SpecialDefense,
}

impl BoostType {
    pub fn as_str(self) -> &'static str {
        match self {
            BoostType::SpecialAttack => "SPECIAL_ATTACK",
            BoostType::SpecialDefense => "SPECIAL_DEFENSE",
        }
    }
}

// ---------------------------------------------------------------------------
// Per-variant structs
// ---------------------------------------------------------------------------

/// Sent by a joiner to initiate connection as a player.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    pub sequence_number: u32,
}

/// Host acknowledgement carrying the shared PRNG seed.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResponse {
    pub seed: u32,
    pub sequence_number: u32,
}

/// Sent by a peer to attach as a read-only spectator.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectatorRequest {
    pub sequence_number: u32,
}

/// Creature selection exchanged by both players before the first turn.
///
/// `creature` is a full stats snapshot so the receiving side can battle a
/// creature absent from its local store; `{}` on the wire means no snapshot
/// and the receiver resolves `creature_name` locally.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleSetup {
    /// Always "P2P" in this protocol revision.
    pub communication_mode: String,
    pub creature_name: String,
    pub stat_boosts: StatBoosts,
    pub creature: Option<Creature>,
    pub sequence_number: u32,
}

/// The active peer's move announcement — phase 1 of a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackAnnounce {
    pub move_name: String,
    pub sequence_number: u32,
}

/// The defender's acknowledgement — phase 2 of a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct DefenseAnnounce {
    pub sequence_number: u32,
}

/// One side's independently computed turn outcome — phase 3.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationReport {
    pub attacker: String,
    pub move_used: String,
    /// The attacking creature's own remaining HP.
    pub remaining_health: i32,
    pub damage_dealt: i32,
    pub defender_hp_remaining: i32,
    pub status_message: String,
    pub sequence_number: u32,
}

/// Agreement that both calculations matched — phase 4.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationConfirm {
    pub sequence_number: u32,
}

/// Discrepancy tiebreak: the receiver adopts the sender's values.
///
/// Last-writer-wins convergence only; the protocol has no cryptographic
/// agreement.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionRequest {
    pub attacker: String,
    pub move_used: String,
    pub damage_dealt: i32,
    pub defender_hp_remaining: i32,
    pub sequence_number: u32,
}

/// Terminal announcement once a creature's HP reaches zero.
#[derive(Debug, Clone, PartialEq)]
pub struct GameOver {
    pub winner: String,
    pub loser: String,
    pub sequence_number: u32,
}

/// Post-game rematch negotiation; both sides must send `wants_rematch = true`.
#[derive(Debug, Clone, PartialEq)]
pub struct RematchRequest {
    pub wants_rematch: bool,
    pub sequence_number: u32,
}

/// Text or sticker chat, carried on the same transport as battle traffic.
///
/// `sender_name` is unauthenticated: any source that knows the host address
/// can claim any name. `"SYSTEM"` is reserved for state notifications and
/// bypasses the recipient's chat-enabled gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender_name: String,
    pub content_type: ContentType,
    pub message_text: Option<String>,
    /// Base64-encoded sticker bytes; decoded size is capped at 10 MiB.
    pub sticker_data: Option<String>,
    pub sequence_number: u32,
}

/// Reserved opcode for activating a stat boost; no state-machine consumer
/// is wired in this protocol revision.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostActivation {
    pub boost_type: BoostType,
    pub sequence_number: u32,
}

/// Transport acknowledgement. The only variant without a sequence number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ack {
    pub ack_number: u32,
}

// ---------------------------------------------------------------------------
// Top-level sum type
// ---------------------------------------------------------------------------

/// All message kinds in the protocol. Dispatch is exhaustive match.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    HandshakeRequest(HandshakeRequest),
    HandshakeResponse(HandshakeResponse),
    SpectatorRequest(SpectatorRequest),
    BattleSetup(BattleSetup),
    AttackAnnounce(AttackAnnounce),
    DefenseAnnounce(DefenseAnnounce),
    CalculationReport(CalculationReport),
    CalculationConfirm(CalculationConfirm),
    ResolutionRequest(ResolutionRequest),
    GameOver(GameOver),
    RematchRequest(RematchRequest),
    ChatMessage(ChatMessage),
    BoostActivation(BoostActivation),
    Ack(Ack),
}

impl Message {
    /// The wire tag written as the `message_type` line.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::HandshakeRequest(_) => "HANDSHAKE_REQUEST",
            Message::HandshakeResponse(_) => "HANDSHAKE_RESPONSE",
            Message::SpectatorRequest(_) => "SPECTATOR_REQUEST",
            Message::BattleSetup(_) => "BATTLE_SETUP",
            Message::AttackAnnounce(_) => "ATTACK_ANNOUNCE",
            Message::DefenseAnnounce(_) => "DEFENSE_ANNOUNCE",
            Message::CalculationReport(_) => "CALCULATION_REPORT",
            Message::CalculationConfirm(_) => "CALCULATION_CONFIRM",
            Message::ResolutionRequest(_) => "RESOLUTION_REQUEST",
            Message::GameOver(_) => "GAME_OVER",
            Message::RematchRequest(_) => "REMATCH_REQUEST",
            Message::ChatMessage(_) => "CHAT_MESSAGE",
            Message::BoostActivation(_) => "BOOST_ACTIVATION",
            Message::Ack(_) => "ACK",
        }
    }

    /// The message's sequence number; `None` for ACK frames, which carry an
    /// `ack_number` instead.
    pub fn sequence_number(&self) -> Option<u32> {
        match self {
            Message::HandshakeRequest(m) => Some(m.sequence_number),
            Message::HandshakeResponse(m) => Some(m.sequence_number),
            Message::SpectatorRequest(m) => Some(m.sequence_number),
            Message::BattleSetup(m) => Some(m.sequence_number),
            Message::AttackAnnounce(m) => Some(m.sequence_number),
            Message::DefenseAnnounce(m) => Some(m.sequence_number),
            Message::CalculationReport(m) => Some(m.sequence_number),
            Message::CalculationConfirm(m) => Some(m.sequence_number),
            Message::ResolutionRequest(m) => Some(m.sequence_number),
            Message::GameOver(m) => Some(m.sequence_number),
            Message::RematchRequest(m) => Some(m.sequence_number),
            Message::ChatMessage(m) => Some(m.sequence_number),
            Message::BoostActivation(m) => Some(m.sequence_number),
            Message::Ack(_) => None,
        }
    }

    /// Stamp the sequence number on variants that carry one; a no-op for ACK.
    pub fn set_sequence_number(&mut self, seq: u32) {
        match self {
            Message::HandshakeRequest(m) => m.sequence_number = seq,
            Message::HandshakeResponse(m) => m.sequence_number = seq,
            Message::SpectatorRequest(m) => m.sequence_number = seq,
            Message::BattleSetup(m) => m.sequence_number = seq,
            Message::AttackAnnounce(m) => m.sequence_number = seq,
            Message::DefenseAnnounce(m) => m.sequence_number = seq,
            Message::CalculationReport(m) => m.sequence_number = seq,
            Message::CalculationConfirm(m) => m.sequence_number = seq,
            Message::ResolutionRequest(m) => m.sequence_number = seq,
            Message::GameOver(m) => m.sequence_number = seq,
            Message::RematchRequest(m) => m.sequence_number = seq,
            Message::ChatMessage(m) => m.sequence_number = seq,
            Message::BoostActivation(m) => m.sequence_number = seq,
            Message::Ack(_) => {}
        }
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Serialize to a wire frame. Infallible for well-formed messages; the
    /// only JSON values embedded come from types that serialize cleanly.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("message_type: {}\n", self.tag());
        match self {
            Message::HandshakeRequest(_)
            | Message::SpectatorRequest(_)
            | Message::DefenseAnnounce(_)
            | Message::CalculationConfirm(_) => {}
            Message::HandshakeResponse(m) => {
                out.push_str(&format!("seed: {}\n", m.seed));
            }
            Message::BattleSetup(m) => {
                let boosts = serde_json::to_string(&m.stat_boosts)
                    .unwrap_or_else(|_| "{}".to_owned());
                let snapshot = m
                    .creature
                    .as_ref()
                    .and_then(|c| serde_json::to_string(c).ok())
                    .unwrap_or_else(|| "{}".to_owned());
                out.push_str(&format!("communication_mode: {}\n", m.communication_mode));
                out.push_str(&format!("pokemon_name: {}\n", m.creature_name));
                out.push_str(&format!("stat_boosts: {boosts}\n"));
                out.push_str(&format!("pokemon: {snapshot}\n"));
            }
            Message::AttackAnnounce(m) => {
                out.push_str(&format!("move_name: {}\n", m.move_name));
            }
            Message::CalculationReport(m) => {
                out.push_str(&format!("attacker: {}\n", m.attacker));
                out.push_str(&format!("move_used: {}\n", m.move_used));
                out.push_str(&format!("remaining_health: {}\n", m.remaining_health));
                out.push_str(&format!("damage_dealt: {}\n", m.damage_dealt));
                out.push_str(&format!(
                    "defender_hp_remaining: {}\n",
                    m.defender_hp_remaining
                ));
                out.push_str(&format!("status_message: {}\n", m.status_message));
            }
            Message::ResolutionRequest(m) => {
                out.push_str(&format!("attacker: {}\n", m.attacker));
                out.push_str(&format!("move_used: {}\n", m.move_used));
                out.push_str(&format!("damage_dealt: {}\n", m.damage_dealt));
                out.push_str(&format!(
                    "defender_hp_remaining: {}\n",
                    m.defender_hp_remaining
                ));
            }
            Message::GameOver(m) => {
                out.push_str(&format!("winner: {}\n", m.winner));
                out.push_str(&format!("loser: {}\n", m.loser));
            }
            Message::RematchRequest(m) => {
                out.push_str(&format!("wants_rematch: {}\n", m.wants_rematch));
            }
            Message::ChatMessage(m) => {
                out.push_str(&format!("sender_name: {}\n", m.sender_name));
                out.push_str(&format!("content_type: {}\n", m.content_type.as_str()));
                match m.content_type {
                    ContentType::Text => {
                        if let Some(text) = &m.message_text {
                            out.push_str(&format!("message_text: {text}\n"));
                        }
                    }
                    ContentType::Sticker => {
                        if let Some(data) = &m.sticker_data {
                            out.push_str(&format!("sticker_data: {data}\n"));
                        }
                    }
                }
            }
            Message::BoostActivation(m) => {
                out.push_str(&format!("boost_type: {}\n", m.boost_type.as_str()));
            }
            Message::Ack(m) => {
                out.push_str(&format!("ack_number: {}\n", m.ack_number));
                return out.into_bytes();
            }
        }
        if let Some(seq) = self.sequence_number() {
            out.push_str(&format!("sequence_number: {seq}\n"));
        }
        out.into_bytes()
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    /// Parse a wire frame. Field order beyond `message_type` is not
    /// significant; unknown keys are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Message, ParseError> {
        let text = std::str::from_utf8(data).map_err(|_| ParseError::NotUtf8)?;

        let mut fields: HashMap<&str, &str> = HashMap::new();
        for line in text.lines() {
            if let Some((key, value)) = line.split_once(':') {
                fields.insert(key.trim(), value.trim());
            }
        }

        let tag = *fields.get("message_type").ok_or(ParseError::MissingType)?;
        let msg = match tag {
            "HANDSHAKE_REQUEST" => Message::HandshakeRequest(HandshakeRequest {
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "HANDSHAKE_RESPONSE" => Message::HandshakeResponse(HandshakeResponse {
                seed: req_u32(&fields, "seed")?,
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "SPECTATOR_REQUEST" => Message::SpectatorRequest(SpectatorRequest {
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "BATTLE_SETUP" => {
                let boosts_raw = req(&fields, "stat_boosts")?;
                let stat_boosts: StatBoosts = serde_json::from_str(boosts_raw)
                    .map_err(|_| ParseError::InvalidJson("stat_boosts"))?;
                let snapshot_raw = fields.get("pokemon").copied().unwrap_or("{}");
                let creature = if snapshot_raw == "{}" {
                    None
                } else {
                    Some(
                        serde_json::from_str(snapshot_raw)
                            .map_err(|_| ParseError::InvalidJson("pokemon"))?,
                    )
                };
                Message::BattleSetup(BattleSetup {
                    communication_mode: req(&fields, "communication_mode")?.to_owned(),
                    creature_name: req(&fields, "pokemon_name")?.to_owned(),
                    stat_boosts,
                    creature,
                    sequence_number: req_u32(&fields, "sequence_number")?,
                })
            }
            "ATTACK_ANNOUNCE" => Message::AttackAnnounce(AttackAnnounce {
                move_name: req(&fields, "move_name")?.to_owned(),
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "DEFENSE_ANNOUNCE" => Message::DefenseAnnounce(DefenseAnnounce {
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "CALCULATION_REPORT" => Message::CalculationReport(CalculationReport {
                attacker: req(&fields, "attacker")?.to_owned(),
                move_used: req(&fields, "move_used")?.to_owned(),
                remaining_health: req_i32(&fields, "remaining_health")?,
                damage_dealt: req_i32(&fields, "damage_dealt")?,
                defender_hp_remaining: req_i32(&fields, "defender_hp_remaining")?,
                status_message: req(&fields, "status_message")?.to_owned(),
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "CALCULATION_CONFIRM" => Message::CalculationConfirm(CalculationConfirm {
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "RESOLUTION_REQUEST" => Message::ResolutionRequest(ResolutionRequest {
                attacker: req(&fields, "attacker")?.to_owned(),
                move_used: req(&fields, "move_used")?.to_owned(),
                damage_dealt: req_i32(&fields, "damage_dealt")?,
                defender_hp_remaining: req_i32(&fields, "defender_hp_remaining")?,
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "GAME_OVER" => Message::GameOver(GameOver {
                winner: req(&fields, "winner")?.to_owned(),
                loser: req(&fields, "loser")?.to_owned(),
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "REMATCH_REQUEST" => Message::RematchRequest(RematchRequest {
                wants_rematch: req(&fields, "wants_rematch")? == "true",
                sequence_number: req_u32(&fields, "sequence_number")?,
            }),
            "CHAT_MESSAGE" => {
                let content_type = match req(&fields, "content_type")? {
                    "TEXT" => ContentType::Text,
                    "STICKER" => ContentType::Sticker,
                    _ => return Err(ParseError::InvalidValue("content_type")),
                };
                Message::ChatMessage(ChatMessage {
                    sender_name: req(&fields, "sender_name")?.to_owned(),
                    content_type,
                    message_text: fields.get("message_text").map(|s| (*s).to_owned()),
                    sticker_data: fields.get("sticker_data").map(|s| (*s).to_owned()),
                    sequence_number: req_u32(&fields, "sequence_number")?,
                })
            }
            "BOOST_ACTIVATION" => {
                let boost_type = match req(&fields, "boost_type")? {
                    "SPECIAL_ATTACK" => BoostType::SpecialAttack,
                    "SPECIAL_DEFENSE" => BoostType::SpecialDefense,
                    _ => return Err(ParseError::InvalidValue("boost_type")),
                };
                Message::BoostActivation(BoostActivation {
                    boost_type,
                    sequence_number: req_u32(&fields, "sequence_number")?,
                })
            }
            "ACK" => Message::Ack(Ack {
                ack_number: req_u32(&fields, "ack_number")?,
            }),
            other => return Err(ParseError::UnknownType(other.to_owned())),
        };
        Ok(msg)
    }
}

fn req<'a>(fields: &HashMap<&str, &'a str>, key: &'static str) -> Result<&'a str, ParseError> {
    fields.get(key).copied().ok_or(ParseError::MissingField(key))
}

fn req_u32(fields: &HashMap<&str, &str>, key: &'static str) -> Result<u32, ParseError> {
    req(fields, key)?
        .parse()
        .map_err(|_| ParseError::InvalidNumber(key))
}

fn req_i32(fields: &HashMap<&str, &str>, key: &'static str) -> Result<i32, ParseError> {
    req(fields, key)?
        .parse()
        .map_err(|_| ParseError::InvalidNumber(key))
}

// ---------------------------------------------------------------------------
// ParseError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("missing message_type field")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid numeric value in field: {0}")]
    InvalidNumber(&'static str),
    #[error("invalid JSON value in field: {0}")]
    InvalidJson(&'static str),
    #[error("invalid value in field: {0}")]
    InvalidValue(&'static str),
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
