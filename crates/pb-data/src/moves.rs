//! The move catalog.
//!
//! Moves are a fixed built-in table rather than an external data file; both
//! peers must resolve a move name to identical power/category/type values
//! for damage calculations to agree.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Whether a move's damage runs through attack/defense or the special pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Physical,
    Special,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Category::Physical => write!(f, "physical"),
            Category::Special => write!(f, "special"),
        }
    }
}

/// One attack move: base power, damage category, elemental type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub name: String,
    pub power: i32,
    pub category: Category,
    pub elemental: String,
}

impl Move {
    fn new(name: &str, power: i32, category: Category, elemental: &str) -> Self {
        Move {
            name: name.to_owned(),
            power,
            category,
            elemental: elemental.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// MoveStore
// ---------------------------------------------------------------------------

/// Read-only move lookup. Names are case-sensitive exact matches.
#[derive(Debug)]
pub struct MoveStore {
    moves: HashMap<String, Move>,
}

impl MoveStore {
    /// The built-in catalog: five moves per elemental type (four for a few).
    #[rustfmt::skip]
    pub fn builtin() -> Self {
        use Category::{Physical, Special};
        let table = [
            Move::new("Ember", 40, Special, "fire"),
            Move::new("Flame Thrower", 90, Special, "fire"),
            Move::new("Fire Blast", 110, Special, "fire"),
            Move::new("Flame Charge", 50, Physical, "fire"),
            Move::new("Fire Fang", 65, Physical, "fire"),
            Move::new("Water Gun", 40, Special, "water"),
            Move::new("Hydro Pump", 110, Special, "water"),
            Move::new("Surf", 90, Special, "water"),
            Move::new("Aqua Tail", 90, Physical, "water"),
            Move::new("Waterfall", 80, Physical, "water"),
            Move::new("Thunder Shock", 40, Special, "electric"),
            Move::new("Thunderbolt", 90, Special, "electric"),
            Move::new("Thunder", 110, Special, "electric"),
            Move::new("Wild Charge", 90, Physical, "electric"),
            Move::new("Thunder Punch", 75, Physical, "electric"),
            Move::new("Vine Whip", 45, Physical, "grass"),
            Move::new("Solar Beam", 120, Special, "grass"),
            Move::new("Leaf Blade", 90, Physical, "grass"),
            Move::new("Energy Ball", 90, Special, "grass"),
            Move::new("Seed Bomb", 80, Physical, "grass"),
            Move::new("Confusion", 50, Special, "psychic"),
            Move::new("Psychic", 90, Special, "psychic"),
            Move::new("Psyshock", 80, Special, "psychic"),
            Move::new("Zen Headbutt", 80, Physical, "psychic"),
            Move::new("Psycho Cut", 70, Physical, "psychic"),
            Move::new("Tackle", 40, Physical, "normal"),
            Move::new("Body Slam", 85, Physical, "normal"),
            Move::new("Hyper Beam", 150, Special, "normal"),
            Move::new("Return", 102, Physical, "normal"),
            Move::new("Swift", 60, Special, "normal"),
            Move::new("Karate Chop", 50, Physical, "fighting"),
            Move::new("Close Combat", 120, Physical, "fighting"),
            Move::new("Aura Sphere", 80, Special, "fighting"),
            Move::new("Brick Break", 75, Physical, "fighting"),
            Move::new("Focus Blast", 120, Special, "fighting"),
            Move::new("Poison Sting", 15, Physical, "poison"),
            Move::new("Sludge Bomb", 90, Special, "poison"),
            Move::new("Gunk Shot", 120, Physical, "poison"),
            Move::new("Acid", 40, Special, "poison"),
            Move::new("Cross Poison", 70, Physical, "poison"),
            Move::new("Bug Bite", 60, Physical, "bug"),
            Move::new("X-Scissor", 80, Physical, "bug"),
            Move::new("Bug Buzz", 90, Special, "bug"),
            Move::new("Signal Beam", 75, Special, "bug"),
            Move::new("Megahorn", 120, Physical, "bug"),
            Move::new("Bite", 60, Physical, "dark"),
            Move::new("Crunch", 80, Physical, "dark"),
            Move::new("Dark Pulse", 80, Special, "dark"),
            Move::new("Foul Play", 95, Physical, "dark"),
            Move::new("Night Slash", 70, Physical, "dark"),
            Move::new("Dragon Breath", 60, Special, "dragon"),
            Move::new("Dragon Claw", 80, Physical, "dragon"),
            Move::new("Dragon Pulse", 85, Special, "dragon"),
            Move::new("Outrage", 120, Physical, "dragon"),
            Move::new("Fairy Wind", 40, Special, "fairy"),
            Move::new("Moonblast", 95, Special, "fairy"),
            Move::new("Play Rough", 90, Physical, "fairy"),
            Move::new("Dazzling Gleam", 80, Special, "fairy"),
            Move::new("Peck", 35, Physical, "flying"),
            Move::new("Aerial Ace", 60, Physical, "flying"),
            Move::new("Fly", 90, Physical, "flying"),
            Move::new("Air Slash", 75, Special, "flying"),
            Move::new("Brave Bird", 120, Physical, "flying"),
            Move::new("Lick", 30, Physical, "ghost"),
            Move::new("Shadow Ball", 80, Special, "ghost"),
            Move::new("Shadow Punch", 60, Physical, "ghost"),
            Move::new("Shadow Claw", 70, Physical, "ghost"),
            Move::new("Hex", 65, Special, "ghost"),
            Move::new("Mud Slap", 20, Special, "ground"),
            Move::new("Earthquake", 100, Physical, "ground"),
            Move::new("Earth Power", 90, Special, "ground"),
            Move::new("Bulldoze", 60, Physical, "ground"),
            Move::new("Stomping Tantrum", 75, Physical, "ground"),
            Move::new("Ice Beam", 90, Special, "ice"),
            Move::new("Ice Punch", 75, Physical, "ice"),
            Move::new("Blizzard", 110, Special, "ice"),
            Move::new("Ice Shard", 40, Physical, "ice"),
            Move::new("Avalanche", 60, Physical, "ice"),
            Move::new("Rock Throw", 50, Physical, "rock"),
            Move::new("Rock Slide", 75, Physical, "rock"),
            Move::new("Stone Edge", 100, Physical, "rock"),
            Move::new("Power Gem", 80, Special, "rock"),
            Move::new("Ancient Power", 60, Special, "rock"),
            Move::new("Metal Claw", 50, Physical, "steel"),
            Move::new("Iron Head", 80, Physical, "steel"),
            Move::new("Flash Cannon", 80, Special, "steel"),
            Move::new("Steel Wing", 70, Physical, "steel"),
            Move::new("Meteor Mash", 90, Physical, "steel"),
        ];
        MoveStore {
            moves: table.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }

    /// Exact-match lookup.
    pub fn get(&self, name: &str) -> Option<&Move> {
        self.moves.get(name)
    }

    pub fn all_names(&self) -> Vec<&str> {
        self.moves.keys().map(String::as_str).collect()
    }

    pub fn by_type(&self, elemental: &str) -> Vec<&Move> {
        let elemental = elemental.to_lowercase();
        self.moves
            .values()
            .filter(|m| m.elemental == elemental)
            .collect()
    }
}

impl Default for MoveStore {
    fn default() -> Self {
        MoveStore::builtin()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
