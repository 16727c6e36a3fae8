//! Synchronized damage calculation.
//!
//! Both peers run the same calculation with identical arguments and a
//! lockstep PRNG; the resulting integers must agree exactly, so every
//! intermediate step here is fixed: f64 arithmetic throughout, exactly one
//! random draw per calculation (after the effectiveness and STAB lookups),
//! and truncation toward zero at each integer conversion.

use crate::rng::Mt19937;
use pb_data::{Category, Creature, CreatureStore, Move};
use std::sync::Arc;

pub const DEFAULT_LEVEL: i32 = 50;

const STAB_MULTIPLIER: f64 = 1.5;
const BOOST_MULTIPLIER: f64 = 1.5;

/// The complete result of one turn's calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub attacker: String,
    pub move_used: String,
    pub damage_dealt: i32,
    pub defender_hp_remaining: i32,
    pub status_message: String,
}

pub struct DamageCalculator {
    creatures: Arc<CreatureStore>,
    rng: Mt19937,
}

impl DamageCalculator {
    pub fn new(creatures: Arc<CreatureStore>, seed: u32) -> Self {
        DamageCalculator {
            creatures,
            rng: Mt19937::new(seed),
        }
    }

    /// Re-initialize the PRNG; called when the handshake seed arrives.
    pub fn set_seed(&mut self, seed: u32) {
        self.rng = Mt19937::new(seed);
    }

    /// Compute the damage one use of `mv` deals, plus the narration line.
    ///
    /// Boost flags apply only to special moves: the boosted stat is
    /// `trunc(stat * 1.5)` before entering the formula.
    pub fn calculate(
        &mut self,
        attacker: &Creature,
        defender: &Creature,
        mv: &Move,
        level: i32,
        attacker_boost: bool,
        defender_boost: bool,
    ) -> (i32, String) {
        let (mut attacker_stat, mut defender_stat) = match mv.category {
            Category::Physical => (attacker.attack, defender.defense),
            Category::Special => (attacker.sp_attack, defender.sp_defense),
        };
        if mv.category == Category::Special {
            if attacker_boost {
                attacker_stat = (f64::from(attacker_stat) * BOOST_MULTIPLIER) as i32;
            }
            if defender_boost {
                defender_stat = (f64::from(defender_stat) * BOOST_MULTIPLIER) as i32;
            }
        }

        let type_eff = self.creatures.effectiveness(&defender.name, &mv.elemental);
        let stab = if attacker.has_type(&mv.elemental) {
            STAB_MULTIPLIER
        } else {
            1.0
        };
        let rand = self.rng.uniform(0.85, 1.0);

        // ((2 * Level / 5 + 2) * Power * A/D / 50 + 2) * Type * STAB * Random
        let base = (2.0 * f64::from(level) / 5.0 + 2.0) * f64::from(mv.power)
            * f64::from(attacker_stat)
            / f64::from(defender_stat)
            / 50.0
            + 2.0;
        let damage = ((base * type_eff * stab * rand) as i32).max(1);

        let status = status_message(&attacker.name, &defender.name, &mv.name, type_eff, damage);
        (damage, status)
    }

    /// One full turn: damage plus the defender's HP after the hit.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_turn_outcome(
        &mut self,
        attacker: &Creature,
        defender: &Creature,
        defender_hp: i32,
        mv: &Move,
        level: i32,
        attacker_boost: bool,
        defender_boost: bool,
    ) -> TurnOutcome {
        let (damage, status_message) =
            self.calculate(attacker, defender, mv, level, attacker_boost, defender_boost);
        TurnOutcome {
            attacker: attacker.name.clone(),
            move_used: mv.name.clone(),
            damage_dealt: damage,
            defender_hp_remaining: (defender_hp - damage).max(0),
            status_message,
        }
    }

    /// Recompute a turn and check the peer's reported numbers against ours.
    /// Used for discrepancy diagnostics; the live path compares recorded
    /// outcomes instead.
    #[allow(clippy::too_many_arguments)]
    pub fn verify_outcome(
        &mut self,
        attacker: &Creature,
        defender: &Creature,
        defender_hp: i32,
        mv: &Move,
        level: i32,
        expected_damage: i32,
        expected_defender_hp: i32,
    ) -> bool {
        let outcome =
            self.calculate_turn_outcome(attacker, defender, defender_hp, mv, level, false, false);
        outcome.damage_dealt == expected_damage
            && outcome.defender_hp_remaining == expected_defender_hp
    }
}

fn status_message(
    attacker: &str,
    defender: &str,
    move_name: &str,
    effectiveness: f64,
    damage: i32,
) -> String {
    let mut msg = format!("{attacker} used {move_name}!");
    if effectiveness >= 2.0 {
        msg.push_str(" It's super effective!");
    } else if effectiveness <= 0.5 {
        msg.push_str(" It's not very effective...");
    }
    msg.push_str(&format!(" {defender} took {damage} damage!"));
    msg
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
