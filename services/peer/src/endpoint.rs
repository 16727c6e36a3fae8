//! The endpoint runtime: one UDP socket, one driving task.
//!
//! The loop alternates receive, dispatch, and reliability tick; no other
//! task touches the battle session or the reliability table. Embedders talk
//! to a running endpoint through [`PeerHandle`]: commands go in over an mpsc
//! channel, observations come back on a broadcast event stream.
//!
//! # Turn handshake
//! 1. The active peer announces its move and enters ProcessingTurn.
//! 2. The defender acknowledges with a defense announcement and follows.
//! 3. Both sides independently compute the damage, apply it speculatively,
//!    and report their numbers.
//! 4. Matching reports are confirmed (the defender completes the turn on
//!    sending the confirm, the active peer on receiving it). On a mismatch
//!    the HOST's numbers win: it sends a resolution request and the joiner
//!    adopts those values. Convergence only — there is no cryptographic
//!    agreement.

use crate::chat;
use crate::config::{PeerConfig, PeerRole};
use crate::events::PeerEvent;
use crate::fanout::{self, SpectatorRoster};
use crate::reliability::ReliabilityLayer;
use pb_data::{CreatureStore, MoveStore};
use pb_engine::{BattleCreature, BattleSession, BattleState, CalcRecord, DamageCalculator, Role};
use pb_protocol::{
    Ack, AttackAnnounce, BattleSetup, CalculationConfirm, CalculationReport, ChatMessage,
    ContentType, DefenseAnnounce, GameOver, HandshakeRequest, HandshakeResponse, Message,
    RematchRequest, ResolutionRequest, SpectatorRequest, StatBoosts, MAX_FRAME,
};
use rand::Rng as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 64;
const SEND_ATTEMPTS: u32 = 3;
const SEND_BACKOFF: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("bind failed: {0}")]
    Bind(std::io::Error),
    #[error("invalid host address: {0}")]
    Addr(String),
    #[error("connect: {0}")]
    Connect(String),
    #[error("not connected")]
    NotConnected,
    #[error("unknown creature: {0}")]
    UnknownCreature(String),
    #[error("unknown move: {0}")]
    UnknownMove(String),
    #[error("not your turn")]
    NotYourTurn,
    #[error("spectators cannot battle")]
    SpectatorRole,
    #[error("no battle to rematch")]
    NoFinishedBattle,
    #[error("invalid sticker data (must be base64, decoded size <= 10 MiB)")]
    InvalidSticker,
    #[error("endpoint terminated")]
    Terminated,
}

// ---------------------------------------------------------------------------
// Commands and the handle
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    StartBattle {
        creature: String,
        attack_uses: i32,
        defense_uses: i32,
    },
    UseMove {
        name: String,
    },
    Chat {
        sender: String,
        text: String,
    },
    Sticker {
        sender: String,
        data: String,
    },
    Rematch {
        wants: bool,
    },
    SetChatEnabled(bool),
    Disconnect,
}

/// Cloneable handle to a running endpoint.
///
/// Commands are fire-and-forget: validation failures (unknown move, not your
/// turn) surface on the event stream as [`PeerEvent::Warning`] rather than
/// as return values, because the endpoint task processes commands
/// asynchronously.
#[derive(Clone)]
pub struct PeerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<PeerEvent>,
    local_addr: SocketAddr,
}

impl PeerHandle {
    /// Subscribe to the endpoint's event stream.
    pub fn events(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn start_battle(
        &self,
        creature: &str,
        attack_uses: i32,
        defense_uses: i32,
    ) -> Result<(), PeerError> {
        self.send(Command::StartBattle {
            creature: creature.to_owned(),
            attack_uses,
            defense_uses,
        })
        .await
    }

    pub async fn use_move(&self, name: &str) -> Result<(), PeerError> {
        self.send(Command::UseMove {
            name: name.to_owned(),
        })
        .await
    }

    pub async fn send_chat(&self, sender: &str, text: &str) -> Result<(), PeerError> {
        self.send(Command::Chat {
            sender: sender.to_owned(),
            text: text.to_owned(),
        })
        .await
    }

    /// `data` must be base64; it is validated before transmission.
    pub async fn send_sticker(&self, sender: &str, data: &str) -> Result<(), PeerError> {
        self.send(Command::Sticker {
            sender: sender.to_owned(),
            data: data.to_owned(),
        })
        .await
    }

    pub async fn request_rematch(&self, wants: bool) -> Result<(), PeerError> {
        self.send(Command::Rematch { wants }).await
    }

    /// Gate local chat display; the transport keeps delivering either way.
    pub async fn set_chat_enabled(&self, enabled: bool) -> Result<(), PeerError> {
        self.send(Command::SetChatEnabled(enabled)).await
    }

    /// Shut the endpoint down and abandon in-flight retransmits.
    pub async fn disconnect(&self) -> Result<(), PeerError> {
        self.send(Command::Disconnect).await
    }

    async fn send(&self, cmd: Command) -> Result<(), PeerError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| PeerError::Terminated)
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// One protocol endpoint: socket, reliability state, battle session, and
/// (for hosts) the spectator roster. Drive it with [`Endpoint::run`].
pub struct Endpoint {
    socket: UdpSocket,
    role: PeerRole,
    creatures: Arc<CreatureStore>,
    moves: Arc<MoveStore>,
    calculator: DamageCalculator,
    session: BattleSession,
    reliability: ReliabilityLayer,
    spectators: SpectatorRoster,
    peer_addr: Option<SocketAddr>,
    connected: bool,
    seed: u32,
    fixed_seed: Option<u32>,
    level: i32,
    chat_enabled: bool,
    tick_every: Duration,
    connect_timeout: Duration,
    /// A calculation report that outran its attack announcement; re-injected
    /// once the turn opens.
    early_report: Option<CalcRecord>,
    /// Spectator-only latch: both peers announce the same game over, the
    /// mirror delivers both, the event fires once.
    game_over_seen: bool,
    events: broadcast::Sender<PeerEvent>,
    commands: mpsc::Receiver<Command>,
}

impl Endpoint {
    /// Bind a socket for the configured role and return the endpoint plus
    /// its handle. Joiner and spectator endpoints must [`Endpoint::connect`]
    /// before [`Endpoint::run`].
    pub async fn new(
        cfg: &PeerConfig,
        creatures: Arc<CreatureStore>,
        moves: Arc<MoveStore>,
    ) -> Result<(Endpoint, PeerHandle), PeerError> {
        let peer_addr = match cfg.role {
            PeerRole::Host => None,
            PeerRole::Joiner | PeerRole::Spectator => {
                let raw = cfg
                    .host_addr
                    .as_deref()
                    .ok_or_else(|| PeerError::Addr("host_addr not configured".to_owned()))?;
                Some(
                    raw.parse::<SocketAddr>()
                        .map_err(|e| PeerError::Addr(format!("{raw}: {e}")))?,
                )
            }
        };

        let socket = UdpSocket::bind(("0.0.0.0", cfg.bind_port))
            .await
            .map_err(PeerError::Bind)?;
        let local_addr = socket.local_addr().map_err(PeerError::Bind)?;
        info!(role = ?cfg.role, %local_addr, "endpoint bound");

        let session_role = match cfg.role {
            PeerRole::Host => Role::Host,
            PeerRole::Joiner | PeerRole::Spectator => Role::Joiner,
        };

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let endpoint = Endpoint {
            socket,
            role: cfg.role,
            calculator: DamageCalculator::new(Arc::clone(&creatures), 0),
            creatures,
            moves,
            session: BattleSession::new(session_role),
            reliability: ReliabilityLayer::new(
                cfg.reliability.timeout,
                cfg.reliability.max_retries,
            ),
            spectators: SpectatorRoster::default(),
            peer_addr,
            connected: false,
            seed: 0,
            fixed_seed: cfg.seed,
            level: cfg.level,
            chat_enabled: cfg.chat_enabled,
            tick_every: cfg.reliability.tick,
            connect_timeout: cfg.connect_timeout,
            early_report: None,
            game_over_seen: false,
            events: event_tx.clone(),
            commands: cmd_rx,
        };
        let handle = PeerHandle {
            commands: cmd_tx,
            events: event_tx,
            local_addr,
        };
        Ok((endpoint, handle))
    }

    /// Perform the joiner/spectator handshake: send the request, await the
    /// host's response with the seed. Connection state is only established
    /// on success; a timeout leaves no partial state behind.
    pub async fn connect(&mut self) -> Result<u32, PeerError> {
        let target = match self.role {
            PeerRole::Host => return Err(PeerError::Connect("hosts accept, not connect".to_owned())),
            _ => self.peer_addr.ok_or(PeerError::NotConnected)?,
        };
        let request = match self.role {
            PeerRole::Joiner => Message::HandshakeRequest(HandshakeRequest { sequence_number: 0 }),
            _ => Message::SpectatorRequest(SpectatorRequest { sequence_number: 0 }),
        };
        self.send_message(request, target).await;

        let deadline = Instant::now() + self.connect_timeout;
        let mut buf = vec![0u8; MAX_FRAME];
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                self.reliability.reset();
                return Err(PeerError::Connect(
                    "timed out waiting for handshake response".to_owned(),
                ));
            };
            let slice = remaining.min(self.tick_every);
            match time::timeout(slice, self.socket.recv_from(&mut buf)).await {
                Err(_) => {
                    // Poll slice elapsed; drive handshake retransmission.
                    self.flush_retransmits().await;
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "receive error during connect");
                }
                Ok(Ok((n, addr))) => {
                    let Ok(msg) = Message::from_bytes(&buf[..n]) else {
                        continue;
                    };
                    match msg {
                        Message::Ack(ack) => self.reliability.on_ack(ack.ack_number),
                        Message::HandshakeResponse(resp) => {
                            self.send_ack(resp.sequence_number, addr).await;
                            self.reliability.mark_received(resp.sequence_number);
                            self.seed = resp.seed;
                            self.calculator.set_seed(resp.seed);
                            self.connected = true;
                            info!(seed = resp.seed, host = %addr, "connected");
                            self.emit(PeerEvent::Connected { seed: resp.seed });
                            return Ok(resp.seed);
                        }
                        // Anything else stays un-ACKed so the host keeps
                        // retransmitting it into the main loop.
                        other => debug!(tag = other.tag(), "ignored during connect"),
                    }
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Drive the endpoint until disconnected. Single task: all session and
    /// reliability state is touched only from here.
    pub async fn run(mut self) {
        let mut tick = time::interval(self.tick_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_FRAME];
        info!(role = ?self.role, "endpoint running");

        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => {
                    match cmd {
                        None | Some(Command::Disconnect) => break,
                        Some(cmd) => {
                            if let Err(e) = self.handle_command(cmd).await {
                                warn!(error = %e, "command rejected");
                                self.emit(PeerEvent::Warning(e.to_string()));
                            }
                        }
                    }
                }
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, addr)) => self.handle_datagram(&buf[..n], addr).await,
                        Err(e) => error!(error = %e, "socket receive failed"),
                    }
                }
                _ = tick.tick() => self.flush_retransmits().await,
            }
        }

        self.session.mark_disconnected();
        self.reliability.reset();
        self.emit(PeerEvent::Disconnected);
        info!(role = ?self.role, "endpoint stopped");
    }

    // -----------------------------------------------------------------------
    // Inbound path
    // -----------------------------------------------------------------------

    async fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        let msg = match Message::from_bytes(data) {
            Ok(msg) => msg,
            Err(e) => {
                // Malformed frames are not ACKed; a malformed peer must not
                // block the channel.
                debug!(error = %e, from = %addr, "dropping malformed datagram");
                return;
            }
        };

        if let Message::Ack(ack) = &msg {
            self.reliability.on_ack(ack.ack_number);
            return;
        }
        if let Some(seq) = msg.sequence_number() {
            self.send_ack(seq, addr).await;
            if self.reliability.is_duplicate(seq) {
                debug!(seq, tag = msg.tag(), "duplicate dropped");
                return;
            }
            self.reliability.mark_received(seq);
        }

        match self.role {
            PeerRole::Host => self.dispatch_host(msg, addr).await,
            PeerRole::Joiner => self.dispatch_joiner(msg, addr).await,
            PeerRole::Spectator => self.dispatch_spectator(msg, addr),
        }
    }

    async fn dispatch_host(&mut self, msg: Message, addr: SocketAddr) {
        match msg {
            Message::HandshakeRequest(_) => self.handle_handshake_request(addr).await,
            Message::SpectatorRequest(_) => self.handle_spectator_request(addr).await,
            Message::ChatMessage(chat) => self.handle_chat(chat, addr).await,
            other if self.connected && Some(addr) == self.peer_addr => {
                self.mirror_to_spectators(&other).await;
                self.dispatch_battle(other).await;
            }
            other => {
                debug!(tag = other.tag(), from = %addr, "battle frame from non-peer dropped");
            }
        }
    }

    async fn dispatch_joiner(&mut self, msg: Message, addr: SocketAddr) {
        match msg {
            // Handshake already completed in connect(); late duplicates are
            // harmless.
            Message::HandshakeResponse(_) => {}
            Message::ChatMessage(chat) => self.handle_chat(chat, addr).await,
            other if self.connected => self.dispatch_battle(other).await,
            other => debug!(tag = other.tag(), "dropped before connect"),
        }
    }

    async fn dispatch_battle(&mut self, msg: Message) {
        match msg {
            Message::BattleSetup(setup) => self.handle_battle_setup(setup),
            Message::AttackAnnounce(announce) => self.handle_attack_announce(announce).await,
            Message::DefenseAnnounce(_) => self.handle_defense_announce().await,
            Message::CalculationReport(report) => self.handle_calculation_report(report).await,
            Message::CalculationConfirm(_) => self.handle_calculation_confirm().await,
            Message::ResolutionRequest(resolution) => {
                self.handle_resolution_request(resolution).await;
            }
            Message::GameOver(game_over) => self.handle_game_over(&game_over),
            Message::RematchRequest(rematch) => self.handle_rematch_request(&rematch),
            Message::BoostActivation(boost) => {
                // Reserved opcode: parsed and ACKed, no consumer wired.
                debug!(boost = boost.boost_type.as_str(), "boost activation ignored");
            }
            other => debug!(tag = other.tag(), "unexpected battle frame dropped"),
        }
    }

    fn dispatch_spectator(&mut self, msg: Message, addr: SocketAddr) {
        match msg {
            Message::HandshakeResponse(_) => {}
            Message::ChatMessage(chat) => {
                // Spectators never reflect; local delivery only.
                if let Some(event) = self.chat_event(&chat) {
                    self.emit(event);
                }
            }
            Message::BattleSetup(setup) => {
                self.game_over_seen = false;
                self.emit(PeerEvent::BattleUpdate(format!(
                    "Battle starting: {} joins the battle!",
                    setup.creature_name
                )));
            }
            Message::AttackAnnounce(announce) => self.emit(PeerEvent::BattleUpdate(format!(
                "Attack announced: {}",
                announce.move_name
            ))),
            Message::DefenseAnnounce(_) => {}
            Message::CalculationReport(report) => {
                self.emit(PeerEvent::BattleUpdate(format!(
                    "{} (Damage: {}, Defender HP: {})",
                    report.status_message, report.damage_dealt, report.defender_hp_remaining
                )));
            }
            Message::GameOver(game_over) => {
                if self.game_over_seen {
                    debug!("spectator absorbing second game over announcement");
                    return;
                }
                self.game_over_seen = true;
                self.emit(PeerEvent::BattleUpdate(format!(
                    "Game Over! {} wins!",
                    game_over.winner
                )));
                self.emit(PeerEvent::GameOver {
                    winner: game_over.winner,
                    loser: game_over.loser,
                });
            }
            other => debug!(tag = other.tag(), from = %addr, "spectator ignoring frame"),
        }
    }

    // -----------------------------------------------------------------------
    // Host connection handlers
    // -----------------------------------------------------------------------

    async fn handle_handshake_request(&mut self, addr: SocketAddr) {
        if self.connected && self.peer_addr != Some(addr) {
            debug!(from = %addr, "second joiner rejected; peer slot taken");
            return;
        }
        let newly_connected = !self.connected;
        if newly_connected {
            self.peer_addr = Some(addr);
            self.seed = self
                .fixed_seed
                .unwrap_or_else(|| rand::rng().random_range(1..=99_999));
            self.calculator.set_seed(self.seed);
            self.connected = true;
        }
        let response = Message::HandshakeResponse(HandshakeResponse {
            seed: self.seed,
            sequence_number: 0,
        });
        self.send_message(response, addr).await;
        if newly_connected {
            info!(joiner = %addr, seed = self.seed, "joiner connected");
            self.emit(PeerEvent::Connected { seed: self.seed });
        }
    }

    async fn handle_spectator_request(&mut self, addr: SocketAddr) {
        if self.spectators.add(addr) {
            info!(spectator = %addr, "spectator joined");
            self.emit(PeerEvent::SpectatorJoined { addr });
        }
        // Always respond: a re-request means the original response was lost.
        let response = Message::HandshakeResponse(HandshakeResponse {
            seed: self.seed,
            sequence_number: 0,
        });
        self.send_message(response, addr).await;
    }

    // -----------------------------------------------------------------------
    // Battle handlers (host and joiner)
    // -----------------------------------------------------------------------

    fn handle_battle_setup(&mut self, setup: BattleSetup) {
        if self.session.state() != BattleState::Setup {
            // Stale resend; a started battle must not be corrupted.
            debug!("battle setup outside Setup ignored");
            return;
        }
        let creature = match setup.creature {
            Some(snapshot) => Arc::new(snapshot),
            None => match self.creatures.get(&setup.creature_name) {
                Some(known) => Arc::new(known.clone()),
                None => {
                    warn!(name = %setup.creature_name, "opponent chose a creature we cannot resolve");
                    return;
                }
            },
        };
        let battle = BattleCreature::new(
            creature,
            setup.stat_boosts.special_attack_uses,
            setup.stat_boosts.special_defense_uses,
        );
        self.session.set_opponent_creature(battle);
        self.emit(PeerEvent::BattleUpdate(format!(
            "Opponent chose {}!",
            setup.creature_name
        )));
    }

    /// Phase 2: the opponent announced an attack and we are the defender.
    async fn handle_attack_announce(&mut self, announce: AttackAnnounce) {
        if self.session.state() != BattleState::WaitingForMove {
            // Duplicate of the active turn, or a stray frame.
            debug!(move_name = %announce.move_name, "attack announce ignored (state)");
            return;
        }
        let Some(mv) = self.moves.get(&announce.move_name).cloned() else {
            warn!(move_name = %announce.move_name, "unknown move announced");
            return;
        };
        let Some(attacker_name) = self
            .session
            .opponent_creature
            .as_ref()
            .map(|c| c.creature.name.clone())
        else {
            warn!("attack announce before battle setup");
            return;
        };

        let defense = Message::DefenseAnnounce(DefenseAnnounce { sequence_number: 0 });
        self.send_to_peer(defense).await;

        self.session.advance_to_processing(mv, &attacker_name);
        if let Some(buffered) = self.early_report.take() {
            self.session.record_opponent_calc(buffered);
        }
        self.run_local_calculation().await;
    }

    /// Phase 3 trigger for the active peer.
    async fn handle_defense_announce(&mut self) {
        if self.session.state() != BattleState::ProcessingTurn || !self.session.my_turn() {
            debug!("defense announce ignored (state)");
            return;
        }
        self.run_local_calculation().await;
    }

    /// Run our half of the turn calculation, apply it speculatively, and
    /// report it to the peer.
    async fn run_local_calculation(&mut self) {
        if self.session.state() != BattleState::ProcessingTurn || self.session.my_calc().is_some() {
            return;
        }
        let Some(mv) = self.session.last_move().cloned() else {
            return;
        };
        let Some(attacker_name) = self.session.last_attacker().map(str::to_owned) else {
            return;
        };
        let i_attack = self
            .session
            .my_creature
            .as_ref()
            .is_some_and(|c| c.creature.name == attacker_name);
        let (Some(mine), Some(theirs)) = (
            self.session.my_creature.as_ref(),
            self.session.opponent_creature.as_ref(),
        ) else {
            return;
        };
        let (attacker, defender) = if i_attack { (mine, theirs) } else { (theirs, mine) };

        let outcome = self.calculator.calculate_turn_outcome(
            &attacker.creature,
            &defender.creature,
            defender.current_hp,
            &mv,
            self.level,
            false,
            false,
        );
        let attacker_hp = attacker.current_hp;
        let record = CalcRecord {
            attacker: outcome.attacker,
            move_used: outcome.move_used,
            damage_dealt: outcome.damage_dealt,
            defender_hp_remaining: outcome.defender_hp_remaining,
            status_message: outcome.status_message,
        };

        self.session.record_my_calc(record.clone());
        self.session.apply_calculation(&record);
        self.emit(PeerEvent::BattleUpdate(record.status_message.clone()));

        let report = Message::CalculationReport(CalculationReport {
            attacker: record.attacker.clone(),
            move_used: record.move_used.clone(),
            remaining_health: attacker_hp,
            damage_dealt: record.damage_dealt,
            defender_hp_remaining: record.defender_hp_remaining,
            status_message: record.status_message.clone(),
            sequence_number: 0,
        });
        self.send_to_peer(report).await;
        self.settle_if_both_present().await;
    }

    /// Phase 4: the peer's numbers arrived.
    async fn handle_calculation_report(&mut self, report: CalculationReport) {
        let record = CalcRecord {
            attacker: report.attacker,
            move_used: report.move_used,
            damage_dealt: report.damage_dealt,
            defender_hp_remaining: report.defender_hp_remaining,
            status_message: report.status_message,
        };
        match self.session.state() {
            BattleState::ProcessingTurn => {
                self.session.record_opponent_calc(record);
                if self.session.my_calc().is_none() {
                    // The report outran our own calculation trigger; the
                    // active peer can take it as the defender's ack.
                    if self.session.my_turn() {
                        self.run_local_calculation().await;
                    }
                    return;
                }
                self.settle_if_both_present().await;
            }
            BattleState::WaitingForMove => {
                // Reordered ahead of the attack announcement; hold it.
                debug!("buffering early calculation report");
                self.early_report = Some(record);
            }
            _ => debug!("calculation report ignored (state)"),
        }
    }

    /// Compare both calculations and either confirm or resolve.
    async fn settle_if_both_present(&mut self) {
        if self.session.state() != BattleState::ProcessingTurn
            || !self.session.both_calcs_present()
            || self.session.calculation_confirmed()
        {
            return;
        }
        if self.session.calculations_match() {
            let confirm = Message::CalculationConfirm(CalculationConfirm { sequence_number: 0 });
            self.send_to_peer(confirm).await;
            self.session.mark_calculation_confirmed();
            if !self.session.my_turn() {
                // The defender completes the turn on sending the confirm.
                let record = self.session.my_calc().cloned();
                self.complete_turn(record).await;
            }
            return;
        }

        match self.session.role() {
            // The host's numbers win every discrepancy.
            Role::Host => {
                let Some(mine) = self.session.my_calc().cloned() else {
                    return;
                };
                warn!(
                    ours = mine.damage_dealt,
                    theirs = self
                        .session
                        .opponent_calc()
                        .map_or(-1, |c| c.damage_dealt),
                    "calculation mismatch, resolving with host values"
                );
                let resolution = Message::ResolutionRequest(ResolutionRequest {
                    attacker: mine.attacker.clone(),
                    move_used: mine.move_used.clone(),
                    damage_dealt: mine.damage_dealt,
                    defender_hp_remaining: mine.defender_hp_remaining,
                    sequence_number: 0,
                });
                self.send_to_peer(resolution).await;
                self.session.mark_calculation_confirmed();
                self.complete_turn(Some(mine)).await;
            }
            Role::Joiner => {
                debug!("calculation mismatch, awaiting host resolution");
            }
        }
    }

    async fn handle_calculation_confirm(&mut self) {
        if self.session.state() != BattleState::ProcessingTurn || !self.session.my_turn() {
            debug!("calculation confirm ignored (state)");
            return;
        }
        self.session.mark_calculation_confirmed();
        let record = self.session.my_calc().cloned();
        self.complete_turn(record).await;
    }

    /// Last-writer-wins overwrite with the sender's values.
    async fn handle_resolution_request(&mut self, resolution: ResolutionRequest) {
        info!(
            damage = resolution.damage_dealt,
            defender_hp = resolution.defender_hp_remaining,
            "adopting peer resolution"
        );
        let record = CalcRecord {
            attacker: resolution.attacker.clone(),
            move_used: resolution.move_used,
            damage_dealt: resolution.damage_dealt,
            defender_hp_remaining: resolution.defender_hp_remaining,
            status_message: String::new(),
        };
        self.session
            .overwrite_defender_hp(&resolution.attacker, resolution.defender_hp_remaining);
        self.session.record_opponent_calc(record.clone());
        self.session.mark_calculation_confirmed();
        self.complete_turn(Some(record)).await;
    }

    /// Finish the turn (no-op outside ProcessingTurn), report it, and check
    /// for a knockout. Detection happens here rather than at the speculative
    /// apply so the confirm exchange and turn flip still complete on a
    /// knockout turn.
    async fn complete_turn(&mut self, record: Option<CalcRecord>) {
        self.early_report = None;
        if self.session.state() == BattleState::ProcessingTurn {
            self.session.advance_to_complete();
            if let Some(record) = record {
                self.emit(PeerEvent::TurnResolved { record });
            }
            self.emit(PeerEvent::BattleUpdate(self.session.status_line()));
        }
        self.check_game_over().await;
    }

    /// Announce the terminal state the instant an HP reaches zero.
    async fn check_game_over(&mut self) {
        if self.session.is_game_over() || !self.session.any_fainted() {
            return;
        }
        self.session.mark_game_over();
        let winner = self.session.winner().unwrap_or_default().to_owned();
        let loser = self.session.loser().unwrap_or_default().to_owned();
        let game_over = Message::GameOver(GameOver {
            winner: winner.clone(),
            loser: loser.clone(),
            sequence_number: 0,
        });
        self.send_to_peer(game_over).await;
        info!(%winner, %loser, "battle over");
        self.emit(PeerEvent::BattleUpdate(format!("Game Over! {winner} wins!")));
        self.emit(PeerEvent::GameOver { winner, loser });
    }

    fn handle_game_over(&mut self, game_over: &GameOver) {
        if self.session.is_game_over() {
            debug!("duplicate game over absorbed");
            return;
        }
        self.session.mark_game_over();
        self.emit(PeerEvent::BattleUpdate(format!(
            "Game Over! {} wins!",
            game_over.winner
        )));
        self.emit(PeerEvent::GameOver {
            winner: game_over.winner.clone(),
            loser: game_over.loser.clone(),
        });
    }

    fn handle_rematch_request(&mut self, rematch: &RematchRequest) {
        self.session.record_opponent_rematch(rematch.wants_rematch);
        self.evaluate_rematch();
    }

    fn evaluate_rematch(&mut self) {
        if self.session.rematch_agreed() {
            self.session.reset_for_rematch();
            info!("rematch agreed, battle reset");
            self.emit(PeerEvent::RematchAgreed);
            self.emit(PeerEvent::BattleUpdate(
                "Rematch! Choose your creature.".to_owned(),
            ));
        } else if self.session.rematch_declined()
            && self.session.state() != BattleState::Disconnected
        {
            info!("rematch declined, session over");
            self.emit(PeerEvent::BattleUpdate("Rematch declined.".to_owned()));
            self.session.mark_disconnected();
            self.emit(PeerEvent::Disconnected);
        }
    }

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------

    async fn handle_chat(&mut self, message: ChatMessage, from: SocketAddr) {
        if message.content_type == ContentType::Sticker {
            let valid = message
                .sticker_data
                .as_deref()
                .is_some_and(chat::sticker_is_valid);
            if !valid {
                warn!(sender = %message.sender_name, "dropping invalid or oversized sticker");
                return;
            }
        }

        if let Some(event) = self.chat_event(&message) {
            self.emit(event);
        }

        if self.role == PeerRole::Host {
            self.reflect_chat(message, from).await;
        }
    }

    /// The local-delivery event for a chat frame, honoring the chat gate.
    fn chat_event(&self, message: &ChatMessage) -> Option<PeerEvent> {
        if !chat::deliver_locally(&message.sender_name, self.chat_enabled) {
            return None;
        }
        match message.content_type {
            ContentType::Text => message.message_text.as_ref().map(|text| PeerEvent::Chat {
                sender: message.sender_name.clone(),
                text: text.clone(),
            }),
            ContentType::Sticker => message.sticker_data.as_ref().map(|data| PeerEvent::Sticker {
                sender: message.sender_name.clone(),
                data: data.clone(),
            }),
        }
    }

    /// Host reflection: joiner chat goes to every spectator; spectator chat
    /// goes to the joiner and every other spectator. Copies are freshly
    /// sequenced with sender and payload preserved.
    async fn reflect_chat(&mut self, message: ChatMessage, from: SocketAddr) {
        if Some(from) == self.peer_addr {
            let targets: Vec<SocketAddr> = self.spectators.iter().collect();
            for target in targets {
                self.send_message(Message::ChatMessage(message.clone()), target)
                    .await;
            }
        } else if self.spectators.contains(from) {
            if let Some(joiner) = self.peer_addr {
                self.send_message(Message::ChatMessage(message.clone()), joiner)
                    .await;
            }
            let targets: Vec<SocketAddr> = self.spectators.iter_except(from).collect();
            for target in targets {
                self.send_message(Message::ChatMessage(message.clone()), target)
                    .await;
            }
        } else {
            debug!(%from, "chat from unknown source not reflected");
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) -> Result<(), PeerError> {
        match cmd {
            Command::StartBattle {
                creature,
                attack_uses,
                defense_uses,
            } => self.cmd_start_battle(&creature, attack_uses, defense_uses).await,
            Command::UseMove { name } => self.cmd_use_move(&name).await,
            Command::Chat { sender, text } => {
                let message = ChatMessage {
                    sender_name: sender,
                    content_type: ContentType::Text,
                    message_text: Some(text),
                    sticker_data: None,
                    sequence_number: 0,
                };
                self.send_chat_frame(message).await;
                Ok(())
            }
            Command::Sticker { sender, data } => {
                if !chat::sticker_is_valid(&data) {
                    return Err(PeerError::InvalidSticker);
                }
                let message = ChatMessage {
                    sender_name: sender,
                    content_type: ContentType::Sticker,
                    message_text: None,
                    sticker_data: Some(data),
                    sequence_number: 0,
                };
                self.send_chat_frame(message).await;
                Ok(())
            }
            Command::Rematch { wants } => self.cmd_rematch(wants).await,
            Command::SetChatEnabled(enabled) => {
                self.chat_enabled = enabled;
                Ok(())
            }
            // Disconnect is intercepted by the run loop before dispatch.
            Command::Disconnect => Ok(()),
        }
    }

    async fn cmd_start_battle(
        &mut self,
        name: &str,
        attack_uses: i32,
        defense_uses: i32,
    ) -> Result<(), PeerError> {
        if self.role == PeerRole::Spectator {
            return Err(PeerError::SpectatorRole);
        }
        if !self.connected {
            return Err(PeerError::NotConnected);
        }
        let creature = self
            .creatures
            .get(name)
            .cloned()
            .ok_or_else(|| PeerError::UnknownCreature(name.to_owned()))?;

        let battle = BattleCreature::new(Arc::new(creature.clone()), attack_uses, defense_uses);
        self.session.set_my_creature(battle);

        let setup = Message::BattleSetup(BattleSetup {
            communication_mode: "P2P".to_owned(),
            creature_name: creature.name.clone(),
            stat_boosts: StatBoosts {
                special_attack_uses: attack_uses,
                special_defense_uses: defense_uses,
            },
            creature: Some(creature.clone()),
            sequence_number: 0,
        });
        self.send_to_peer(setup).await;
        info!(creature = %creature.name, "battle setup sent");
        self.emit(PeerEvent::BattleUpdate(format!("You chose {}!", creature.name)));
        Ok(())
    }

    /// Phase 1: announce our move and enter the turn.
    async fn cmd_use_move(&mut self, name: &str) -> Result<(), PeerError> {
        if self.role == PeerRole::Spectator {
            return Err(PeerError::SpectatorRole);
        }
        if !self.session.is_my_turn() {
            return Err(PeerError::NotYourTurn);
        }
        let mv = self
            .moves
            .get(name)
            .cloned()
            .ok_or_else(|| PeerError::UnknownMove(name.to_owned()))?;
        let Some(my_name) = self
            .session
            .my_creature
            .as_ref()
            .map(|c| c.creature.name.clone())
        else {
            return Err(PeerError::NotConnected);
        };

        let announce = Message::AttackAnnounce(AttackAnnounce {
            move_name: mv.name.clone(),
            sequence_number: 0,
        });
        self.send_to_peer(announce).await;
        self.session.advance_to_processing(mv, &my_name);
        // The calculation itself runs when the defense announcement (or the
        // defender's report) arrives.
        Ok(())
    }

    async fn cmd_rematch(&mut self, wants: bool) -> Result<(), PeerError> {
        if !self.session.is_game_over() {
            return Err(PeerError::NoFinishedBattle);
        }
        let request = Message::RematchRequest(RematchRequest {
            wants_rematch: wants,
            sequence_number: 0,
        });
        self.send_to_peer(request).await;
        self.session.record_my_rematch(wants);
        self.evaluate_rematch();
        Ok(())
    }

    async fn send_chat_frame(&mut self, message: ChatMessage) {
        match self.role {
            PeerRole::Host => {
                if let Some(joiner) = self.peer_addr {
                    self.send_message(Message::ChatMessage(message.clone()), joiner)
                        .await;
                }
                let targets: Vec<SocketAddr> = self.spectators.iter().collect();
                for target in targets {
                    self.send_message(Message::ChatMessage(message.clone()), target)
                        .await;
                }
            }
            PeerRole::Joiner | PeerRole::Spectator => {
                self.send_to_peer(Message::ChatMessage(message)).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound path
    // -----------------------------------------------------------------------

    /// Send to the bound peer, mirroring battle frames to spectators first
    /// when hosting.
    async fn send_to_peer(&mut self, msg: Message) {
        let Some(target) = self.peer_addr else {
            debug!(tag = msg.tag(), "no peer bound, dropping outbound frame");
            return;
        };
        if self.role == PeerRole::Host {
            self.mirror_to_spectators(&msg).await;
        }
        self.send_message(msg, target).await;
    }

    /// Mirror a battle-relevant frame to every spectator, one fresh
    /// sequence number per copy.
    async fn mirror_to_spectators(&mut self, msg: &Message) {
        if self.spectators.is_empty() || !fanout::mirrors_to_spectators(msg) {
            return;
        }
        let targets: Vec<SocketAddr> = self.spectators.iter().collect();
        for target in targets {
            self.send_message(msg.clone(), target).await;
        }
    }

    /// Register with the reliability layer (stamping the sequence number)
    /// and transmit.
    async fn send_message(&mut self, mut msg: Message, target: SocketAddr) {
        self.reliability
            .register_send(&mut msg, target, Instant::now());
        self.transmit(&msg, target).await;
    }

    async fn send_ack(&mut self, seq: u32, target: SocketAddr) {
        let mut ack = Message::Ack(Ack { ack_number: seq });
        self.reliability
            .register_send(&mut ack, target, Instant::now());
        self.transmit(&ack, target).await;
    }

    /// Best-effort datagram send with short linear backoff; a frame that
    /// still fails is left to the retransmit timer.
    async fn transmit(&self, msg: &Message, target: SocketAddr) {
        let data = msg.to_bytes();
        for attempt in 1..=SEND_ATTEMPTS {
            match self.socket.send_to(&data, target).await {
                Ok(_) => return,
                Err(e) if attempt < SEND_ATTEMPTS => {
                    debug!(error = %e, attempt, "send deferred, backing off");
                    time::sleep(SEND_BACKOFF * attempt).await;
                }
                Err(e) => {
                    warn!(error = %e, tag = msg.tag(), %target, "send failed, leaving to retransmit");
                }
            }
        }
    }

    async fn flush_retransmits(&mut self) {
        let result = self.reliability.tick(Instant::now());
        for (seq, msg, target) in result.retransmits {
            debug!(seq, tag = msg.tag(), %target, "retransmitting");
            self.transmit(&msg, target).await;
        }
        for (seq, msg) in result.evicted {
            let tag = msg.tag();
            debug!(seq, tag, "retries exhausted, evicting");
            // Losing a progress-critical frame stalls the session; surface
            // it instead of failing silently.
            if matches!(
                msg,
                Message::BattleSetup(_)
                    | Message::CalculationReport(_)
                    | Message::RematchRequest(_)
            ) {
                warn!(seq, tag, "progress-critical frame undeliverable");
                self.emit(PeerEvent::Warning(format!(
                    "{tag} could not be delivered after retries"
                )));
            }
        }
    }

    fn emit(&self, event: PeerEvent) {
        // A send error only means no subscribers; that is fine.
        let _ = self.events.send(event);
    }
}
