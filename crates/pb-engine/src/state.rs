//! The battle state machine.
//!
//! One `BattleSession` per endpoint tracks the local view of a battle: whose
//! turn it is, both creatures' HP, and the per-turn calculation agreement.
//! Transitions requested from the wrong state are silent no-ops — stale
//! retransmits must never corrupt a battle in progress.
//!
//! Turn completion is asymmetric by design: the active peer leaves
//! ProcessingTurn when it RECEIVES the confirm, the defender when it SENDS
//! it. The endpoint owns that distinction; this type only exposes the
//! transition.

use pb_data::{Creature, Move};
use std::sync::Arc;
use tracing::debug;

/// Which player seat this endpoint occupies. The host always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Joiner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleState {
    Setup,
    WaitingForMove,
    ProcessingTurn,
    GameOver,
    Disconnected,
}

// ---------------------------------------------------------------------------
// BattleCreature
// ---------------------------------------------------------------------------

/// A creature in battle: immutable base stats plus current HP and remaining
/// boost charges.
#[derive(Debug, Clone)]
pub struct BattleCreature {
    pub creature: Arc<Creature>,
    pub current_hp: i32,
    pub max_hp: i32,
    pub special_attack_uses: i32,
    pub special_defense_uses: i32,
}

impl BattleCreature {
    pub fn new(creature: Arc<Creature>, special_attack_uses: i32, special_defense_uses: i32) -> Self {
        BattleCreature {
            current_hp: creature.hp,
            max_hp: creature.hp,
            creature,
            special_attack_uses,
            special_defense_uses,
        }
    }

    /// Apply damage, clamping at zero. Returns the remaining HP.
    pub fn take_damage(&mut self, damage: i32) -> i32 {
        self.current_hp = (self.current_hp - damage).max(0);
        self.current_hp
    }

    pub fn is_fainted(&self) -> bool {
        self.current_hp <= 0
    }

    pub fn can_use_special_attack_boost(&self) -> bool {
        self.special_attack_uses > 0
    }

    pub fn can_use_special_defense_boost(&self) -> bool {
        self.special_defense_uses > 0
    }

    /// Consume one attack boost charge; false when none remain.
    pub fn use_special_attack_boost(&mut self) -> bool {
        if self.can_use_special_attack_boost() {
            self.special_attack_uses -= 1;
            true
        } else {
            false
        }
    }

    /// Consume one defense boost charge; false when none remain.
    pub fn use_special_defense_boost(&mut self) -> bool {
        if self.can_use_special_defense_boost() {
            self.special_defense_uses -= 1;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// CalcRecord
// ---------------------------------------------------------------------------

/// One side's recorded turn calculation. Two records agree when damage and
/// remaining defender HP both match.
#[derive(Debug, Clone, PartialEq)]
pub struct CalcRecord {
    pub attacker: String,
    pub move_used: String,
    pub damage_dealt: i32,
    pub defender_hp_remaining: i32,
    pub status_message: String,
}

impl CalcRecord {
    pub fn matches(&self, other: &CalcRecord) -> bool {
        self.damage_dealt == other.damage_dealt
            && self.defender_hp_remaining == other.defender_hp_remaining
    }
}

// ---------------------------------------------------------------------------
// BattleSession
// ---------------------------------------------------------------------------

pub struct BattleSession {
    role: Role,
    state: BattleState,
    my_turn: bool,
    pub my_creature: Option<BattleCreature>,
    pub opponent_creature: Option<BattleCreature>,
    last_move: Option<Move>,
    last_attacker: Option<String>,
    my_calc: Option<CalcRecord>,
    opponent_calc: Option<CalcRecord>,
    calculation_confirmed: bool,
    my_rematch: Option<bool>,
    opponent_rematch: Option<bool>,
}

impl BattleSession {
    pub fn new(role: Role) -> Self {
        BattleSession {
            role,
            state: BattleState::Setup,
            my_turn: role == Role::Host,
            my_creature: None,
            opponent_creature: None,
            last_move: None,
            last_attacker: None,
            my_calc: None,
            opponent_calc: None,
            calculation_confirmed: false,
            my_rematch: None,
            opponent_rematch: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> BattleState {
        self.state
    }

    pub fn my_turn(&self) -> bool {
        self.my_turn
    }

    /// True only when this peer may announce a move right now.
    pub fn is_my_turn(&self) -> bool {
        self.my_turn && self.state == BattleState::WaitingForMove
    }

    pub fn is_game_over(&self) -> bool {
        self.state == BattleState::GameOver
    }

    pub fn last_move(&self) -> Option<&Move> {
        self.last_move.as_ref()
    }

    pub fn last_attacker(&self) -> Option<&str> {
        self.last_attacker.as_deref()
    }

    pub fn my_calc(&self) -> Option<&CalcRecord> {
        self.my_calc.as_ref()
    }

    pub fn opponent_calc(&self) -> Option<&CalcRecord> {
        self.opponent_calc.as_ref()
    }

    pub fn calculation_confirmed(&self) -> bool {
        self.calculation_confirmed
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    pub fn set_my_creature(&mut self, creature: BattleCreature) {
        self.my_creature = Some(creature);
    }

    /// Record the opponent's selection. When called in Setup this starts the
    /// battle: the session advances to WaitingForMove.
    pub fn set_opponent_creature(&mut self, creature: BattleCreature) {
        self.opponent_creature = Some(creature);
        if self.state == BattleState::Setup {
            debug!(role = ?self.role, "battle setup complete, waiting for move");
            self.state = BattleState::WaitingForMove;
        }
    }

    // -----------------------------------------------------------------------
    // Turn transitions
    // -----------------------------------------------------------------------

    /// WaitingForMove → ProcessingTurn. Clears the previous turn's
    /// calculation tracking.
    pub fn advance_to_processing(&mut self, mv: Move, attacker_name: &str) {
        if self.state != BattleState::WaitingForMove {
            return;
        }
        self.state = BattleState::ProcessingTurn;
        self.last_move = Some(mv);
        self.last_attacker = Some(attacker_name.to_owned());
        self.my_calc = None;
        self.opponent_calc = None;
        self.calculation_confirmed = false;
    }

    /// ProcessingTurn → WaitingForMove, flipping turn ownership.
    pub fn advance_to_complete(&mut self) {
        if self.state != BattleState::ProcessingTurn {
            return;
        }
        self.state = BattleState::WaitingForMove;
        self.my_turn = !self.my_turn;
        self.last_move = None;
        self.last_attacker = None;
    }

    /// Terminal transition; allowed from any state except Disconnected.
    pub fn mark_game_over(&mut self) {
        if self.state != BattleState::Disconnected {
            self.state = BattleState::GameOver;
        }
    }

    pub fn mark_disconnected(&mut self) {
        self.state = BattleState::Disconnected;
    }

    // -----------------------------------------------------------------------
    // Calculation agreement
    // -----------------------------------------------------------------------

    pub fn record_my_calc(&mut self, calc: CalcRecord) {
        self.my_calc = Some(calc);
    }

    pub fn record_opponent_calc(&mut self, calc: CalcRecord) {
        self.opponent_calc = Some(calc);
    }

    /// True when both calculations are present and agree.
    pub fn calculations_match(&self) -> bool {
        match (&self.my_calc, &self.opponent_calc) {
            (Some(mine), Some(theirs)) => mine.matches(theirs),
            _ => false,
        }
    }

    /// True when both calculations are present (matching or not).
    pub fn both_calcs_present(&self) -> bool {
        self.my_calc.is_some() && self.opponent_calc.is_some()
    }

    pub fn mark_calculation_confirmed(&mut self) {
        self.calculation_confirmed = true;
    }

    /// Apply a calculation's damage to whichever side was defending.
    /// Returns the defender's remaining HP, or None before setup completes.
    pub fn apply_calculation(&mut self, calc: &CalcRecord) -> Option<i32> {
        let mine_attacking = self
            .my_creature
            .as_ref()
            .is_some_and(|c| c.creature.name == calc.attacker);
        let defender = if mine_attacking {
            self.opponent_creature.as_mut()?
        } else {
            self.my_creature.as_mut()?
        };
        Some(defender.take_damage(calc.damage_dealt))
    }

    /// Overwrite the defending side's HP with an absolute value (resolution
    /// tiebreak: last writer wins, no re-application of damage).
    pub fn overwrite_defender_hp(&mut self, attacker: &str, defender_hp: i32) -> Option<i32> {
        let mine_attacking = self
            .my_creature
            .as_ref()
            .is_some_and(|c| c.creature.name == attacker);
        let defender = if mine_attacking {
            self.opponent_creature.as_mut()?
        } else {
            self.my_creature.as_mut()?
        };
        defender.current_hp = defender_hp.clamp(0, defender.max_hp);
        Some(defender.current_hp)
    }

    /// Either creature at zero HP.
    pub fn any_fainted(&self) -> bool {
        self.my_creature.as_ref().is_some_and(BattleCreature::is_fainted)
            || self
                .opponent_creature
                .as_ref()
                .is_some_and(BattleCreature::is_fainted)
    }

    /// The standing creature's name once the battle is over.
    pub fn winner(&self) -> Option<&str> {
        if !self.is_game_over() {
            return None;
        }
        let mine = self.my_creature.as_ref()?;
        let theirs = self.opponent_creature.as_ref()?;
        if mine.is_fainted() {
            Some(&theirs.creature.name)
        } else if theirs.is_fainted() {
            Some(&mine.creature.name)
        } else {
            None
        }
    }

    /// The fainted creature's name once the battle is over.
    pub fn loser(&self) -> Option<&str> {
        if !self.is_game_over() {
            return None;
        }
        let mine = self.my_creature.as_ref()?;
        let theirs = self.opponent_creature.as_ref()?;
        if mine.is_fainted() {
            Some(&mine.creature.name)
        } else if theirs.is_fainted() {
            Some(&theirs.creature.name)
        } else {
            None
        }
    }

    // -----------------------------------------------------------------------
    // Rematch
    // -----------------------------------------------------------------------

    /// Record this peer's rematch answer. Only meaningful in GameOver.
    pub fn record_my_rematch(&mut self, wants: bool) {
        if self.is_game_over() {
            self.my_rematch = Some(wants);
        }
    }

    /// The opponent's answer is recorded in any state: its rematch frame may
    /// outrun our own game-over detection.
    pub fn record_opponent_rematch(&mut self, wants: bool) {
        self.opponent_rematch = Some(wants);
    }

    pub fn rematch_agreed(&self) -> bool {
        self.my_rematch == Some(true) && self.opponent_rematch == Some(true)
    }

    /// Anyone has said no.
    pub fn rematch_declined(&self) -> bool {
        self.my_rematch == Some(false) || self.opponent_rematch == Some(false)
    }

    /// Reset for an agreed rematch: back to Setup with fresh creatures, turn
    /// ownership re-derived from the role. The damage PRNG is left alone —
    /// both peers' streams advanced in lockstep, so they remain synchronized.
    pub fn reset_for_rematch(&mut self) {
        self.state = BattleState::Setup;
        self.my_turn = self.role == Role::Host;
        self.my_creature = None;
        self.opponent_creature = None;
        self.last_move = None;
        self.last_attacker = None;
        self.my_calc = None;
        self.opponent_calc = None;
        self.calculation_confirmed = false;
        self.my_rematch = None;
        self.opponent_rematch = None;
    }

    /// One-line battle summary for update events.
    pub fn status_line(&self) -> String {
        match (&self.my_creature, &self.opponent_creature) {
            (Some(mine), Some(theirs)) => format!(
                "{}: {}/{} HP vs {}: {}/{} HP",
                mine.creature.name,
                mine.current_hp,
                mine.max_hp,
                theirs.creature.name,
                theirs.current_hp,
                theirs.max_hp
            ),
            _ => "Battle not initialized".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pb_data::Category;

    fn creature(name: &str, hp: i32) -> Arc<Creature> {
        Arc::new(Creature {
            name: name.to_owned(),
            hp,
            attack: 55,
            defense: 40,
            sp_attack: 50,
            sp_defense: 50,
            speed: 90,
            type1: "electric".to_owned(),
            type2: None,
            effectiveness: std::collections::HashMap::new(),
        })
    }

    fn a_move() -> Move {
        Move {
            name: "Thunderbolt".to_owned(),
            power: 90,
            category: Category::Special,
            elemental: "electric".to_owned(),
        }
    }

    fn ready_session(role: Role) -> BattleSession {
        let mut session = BattleSession::new(role);
        session.set_my_creature(BattleCreature::new(creature("Pikachu", 35), 5, 5));
        session.set_opponent_creature(BattleCreature::new(creature("Charmander", 39), 5, 5));
        session
    }

    fn calc(attacker: &str, damage: i32, remaining: i32) -> CalcRecord {
        CalcRecord {
            attacker: attacker.to_owned(),
            move_used: "Thunderbolt".to_owned(),
            damage_dealt: damage,
            defender_hp_remaining: remaining,
            status_message: String::new(),
        }
    }

    #[test]
    fn host_starts_with_the_turn_and_joiner_without() {
        assert!(BattleSession::new(Role::Host).my_turn());
        assert!(!BattleSession::new(Role::Joiner).my_turn());
    }

    #[test]
    fn opponent_selection_starts_the_battle() {
        let mut session = BattleSession::new(Role::Host);
        assert_eq!(session.state(), BattleState::Setup);
        assert!(!session.is_my_turn());

        session.set_my_creature(BattleCreature::new(creature("Pikachu", 35), 5, 5));
        session.set_opponent_creature(BattleCreature::new(creature("Charmander", 39), 5, 5));
        assert_eq!(session.state(), BattleState::WaitingForMove);
        assert!(session.is_my_turn());
    }

    #[test]
    fn turn_cycle_flips_ownership() {
        let mut session = ready_session(Role::Host);
        session.advance_to_processing(a_move(), "Pikachu");
        assert_eq!(session.state(), BattleState::ProcessingTurn);
        assert!(!session.is_my_turn());

        session.advance_to_complete();
        assert_eq!(session.state(), BattleState::WaitingForMove);
        assert!(!session.my_turn(), "turn passed to the opponent");

        session.advance_to_processing(a_move(), "Charmander");
        session.advance_to_complete();
        assert!(session.my_turn(), "turn came back");
    }

    #[test]
    fn transitions_from_wrong_state_are_noops() {
        let mut session = BattleSession::new(Role::Host);
        // Still in Setup: neither processing nor completion applies.
        session.advance_to_processing(a_move(), "Pikachu");
        assert_eq!(session.state(), BattleState::Setup);
        session.advance_to_complete();
        assert_eq!(session.state(), BattleState::Setup);

        let mut session = ready_session(Role::Host);
        session.advance_to_processing(a_move(), "Pikachu");
        // Duplicate announce while already processing changes nothing.
        let before_attacker = session.last_attacker().unwrap().to_owned();
        session.advance_to_processing(a_move(), "Charmander");
        assert_eq!(session.last_attacker(), Some(before_attacker.as_str()));
    }

    #[test]
    fn disconnected_is_terminal_even_for_game_over() {
        let mut session = ready_session(Role::Host);
        session.mark_disconnected();
        session.mark_game_over();
        assert_eq!(session.state(), BattleState::Disconnected);
    }

    #[test]
    fn apply_calculation_routes_damage_by_attacker() {
        let mut session = ready_session(Role::Host);
        // My Pikachu attacks: opponent takes the hit.
        let remaining = session.apply_calculation(&calc("Pikachu", 10, 29)).unwrap();
        assert_eq!(remaining, 29);
        assert_eq!(session.opponent_creature.as_ref().unwrap().current_hp, 29);
        assert_eq!(session.my_creature.as_ref().unwrap().current_hp, 35);

        // Opponent attacks back: my side takes it.
        let remaining = session.apply_calculation(&calc("Charmander", 7, 28)).unwrap();
        assert_eq!(remaining, 28);
        assert_eq!(session.my_creature.as_ref().unwrap().current_hp, 28);
    }

    #[test]
    fn hp_clamps_at_zero_and_faint_is_detected() {
        let mut session = ready_session(Role::Host);
        session.apply_calculation(&calc("Pikachu", 1000, 0));
        let opponent = session.opponent_creature.as_ref().unwrap();
        assert_eq!(opponent.current_hp, 0);
        assert!(session.any_fainted());

        session.mark_game_over();
        assert_eq!(session.winner(), Some("Pikachu"));
        assert_eq!(session.loser(), Some("Charmander"));
    }

    #[test]
    fn overwrite_defender_hp_is_absolute() {
        let mut session = ready_session(Role::Host);
        session.apply_calculation(&calc("Pikachu", 10, 29));
        // Resolution says the defender actually has 25 left; no re-damage.
        let remaining = session.overwrite_defender_hp("Pikachu", 25).unwrap();
        assert_eq!(remaining, 25);
        assert_eq!(session.opponent_creature.as_ref().unwrap().current_hp, 25);
    }

    #[test]
    fn calculation_agreement_requires_both_records() {
        let mut session = ready_session(Role::Host);
        session.advance_to_processing(a_move(), "Pikachu");
        assert!(!session.calculations_match());

        session.record_my_calc(calc("Pikachu", 10, 29));
        assert!(!session.both_calcs_present());

        session.record_opponent_calc(calc("Pikachu", 10, 29));
        assert!(session.both_calcs_present());
        assert!(session.calculations_match());

        session.record_opponent_calc(calc("Pikachu", 11, 28));
        assert!(!session.calculations_match());
    }

    #[test]
    fn new_turn_clears_calculation_tracking() {
        let mut session = ready_session(Role::Host);
        session.advance_to_processing(a_move(), "Pikachu");
        session.record_my_calc(calc("Pikachu", 10, 29));
        session.record_opponent_calc(calc("Pikachu", 10, 29));
        session.mark_calculation_confirmed();
        session.advance_to_complete();

        session.advance_to_processing(a_move(), "Charmander");
        assert!(session.my_calc().is_none());
        assert!(session.opponent_calc().is_none());
        assert!(!session.calculation_confirmed());
    }

    #[test]
    fn rematch_needs_both_yes() {
        let mut session = ready_session(Role::Joiner);
        // Ignored outside GameOver.
        session.record_my_rematch(true);
        assert!(!session.rematch_agreed());

        session.apply_calculation(&calc("Charmander", 1000, 0));
        session.mark_game_over();
        session.record_my_rematch(true);
        assert!(!session.rematch_agreed());
        session.record_opponent_rematch(true);
        assert!(session.rematch_agreed());

        session.reset_for_rematch();
        assert_eq!(session.state(), BattleState::Setup);
        assert!(!session.my_turn(), "joiner does not start");
        assert!(session.my_creature.is_none());
    }

    #[test]
    fn rematch_decline_is_sticky() {
        let mut session = ready_session(Role::Host);
        session.apply_calculation(&calc("Pikachu", 1000, 0));
        session.mark_game_over();
        session.record_my_rematch(true);
        session.record_opponent_rematch(false);
        assert!(session.rematch_declined());
        assert!(!session.rematch_agreed());
    }

    #[test]
    fn boost_charges_deplete_to_zero() {
        let mut battle = BattleCreature::new(creature("Pikachu", 35), 2, 0);
        assert!(battle.use_special_attack_boost());
        assert!(battle.use_special_attack_boost());
        assert!(!battle.use_special_attack_boost());
        assert_eq!(battle.special_attack_uses, 0);
        assert!(!battle.can_use_special_defense_boost());
        assert!(!battle.use_special_defense_boost());
    }

    #[test]
    fn status_line_reports_both_sides() {
        let session = ready_session(Role::Host);
        assert_eq!(session.status_line(), "Pikachu: 35/35 HP vs Charmander: 39/39 HP");
        let empty = BattleSession::new(Role::Host);
        assert_eq!(empty.status_line(), "Battle not initialized");
    }
}
