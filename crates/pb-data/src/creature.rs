//! Creature stats and the type-effectiveness gateway.
//!
//! Creatures are loaded from a CSV export with one `against_<type>` column
//! per attacking type. Lookups are case-insensitive; the stored record keeps
//! the display-cased name for wire messages and battle text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// The closed set of elemental type names, lowercased.
pub const ELEMENTAL_TYPES: [&str; 18] = [
    "bug", "dark", "dragon", "electric", "fairy", "fighting", "fire", "flying", "ghost", "grass",
    "ground", "ice", "normal", "poison", "psychic", "rock", "steel", "water",
];

/// CSV column holding the defender's reaction to each attacking type.
///
/// The export abbreviates "fighting" to `against_fight`; every other column
/// is `against_<type>` verbatim.
fn against_column(elemental: &str) -> String {
    if elemental == "fighting" {
        "against_fight".to_owned()
    } else {
        format!("against_{elemental}")
    }
}

// ---------------------------------------------------------------------------
// Creature
// ---------------------------------------------------------------------------

/// Base stats and type information for one creature.
///
/// This struct is also the wire snapshot embedded in battle-setup frames, so
/// the serde field names are frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creature {
    pub name: String,
    pub hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub sp_attack: i32,
    pub sp_defense: i32,
    pub speed: i32,
    /// Primary type, lowercased.
    pub type1: String,
    /// Optional secondary type, lowercased.
    pub type2: Option<String>,
    /// Multiplier applied when hit by each attacking type, keyed by
    /// lowercase type name. Typical values: 0, 0.25, 0.5, 1, 2, 4.
    #[serde(rename = "type_effectiveness")]
    pub effectiveness: HashMap<String, f64>,
}

impl Creature {
    /// True when `elemental` matches either of this creature's types.
    pub fn has_type(&self, elemental: &str) -> bool {
        self.type1 == elemental || self.type2.as_deref() == Some(elemental)
    }
}

impl fmt::Display for Creature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.type2 {
            Some(t2) => write!(f, "{} ({}/{})", self.name, self.type1, t2),
            None => write!(f, "{} ({})", self.name, self.type1),
        }
    }
}

// ---------------------------------------------------------------------------
// DataError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing column: {0}")]
    MissingColumn(String),
    #[error("invalid value in column {column} for {name}: {value}")]
    InvalidValue {
        name: String,
        column: String,
        value: String,
    },
}

// ---------------------------------------------------------------------------
// CreatureStore
// ---------------------------------------------------------------------------

/// Read-only creature lookup keyed by lowercase name.
#[derive(Debug, Default)]
pub struct CreatureStore {
    creatures: HashMap<String, Creature>,
}

impl CreatureStore {
    /// Load the store from a CSV file. Failure to load is fatal to the
    /// caller; the store is never partially populated.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &str| -> Result<usize, DataError> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| DataError::MissingColumn(name.to_owned()))
        };

        let name_col = column("name")?;
        let stat_cols = [
            column("hp")?,
            column("attack")?,
            column("defense")?,
            column("sp_attack")?,
            column("sp_defense")?,
            column("speed")?,
        ];
        let type1_col = column("type1")?;
        let type2_col = column("type2")?;

        let mut creatures = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let name = record.get(name_col).unwrap_or_default().to_owned();

            let mut stats = [0i32; 6];
            for (slot, &col) in stats.iter_mut().zip(&stat_cols) {
                let raw = record.get(col).unwrap_or_default();
                *slot = raw.trim().parse().map_err(|_| DataError::InvalidValue {
                    name: name.clone(),
                    column: headers[col].to_owned(),
                    value: raw.to_owned(),
                })?;
            }

            let type1 = record.get(type1_col).unwrap_or_default().trim().to_lowercase();
            let type2 = record
                .get(type2_col)
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty());

            // Reactions with unparseable values are skipped, defaulting to
            // neutral at lookup time.
            let mut effectiveness = HashMap::new();
            for elemental in ELEMENTAL_TYPES {
                if let Ok(col) = column(&against_column(elemental))
                    && let Some(raw) = record.get(col)
                    && let Ok(mult) = raw.trim().parse::<f64>()
                {
                    effectiveness.insert(elemental.to_owned(), mult);
                }
            }

            let creature = Creature {
                name: name.clone(),
                hp: stats[0],
                attack: stats[1],
                defense: stats[2],
                sp_attack: stats[3],
                sp_defense: stats[4],
                speed: stats[5],
                type1,
                type2,
                effectiveness,
            };
            creatures.insert(name.to_lowercase(), creature);
        }

        Ok(CreatureStore { creatures })
    }

    /// Build a store from already-constructed records (test fixtures,
    /// embedded rosters).
    pub fn from_records(records: impl IntoIterator<Item = Creature>) -> Self {
        let creatures = records
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c))
            .collect();
        CreatureStore { creatures }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Creature> {
        self.creatures.get(&name.to_lowercase())
    }

    pub fn all_names(&self) -> Vec<&str> {
        self.creatures.values().map(|c| c.name.as_str()).collect()
    }

    /// Multiplier for `attacking_type` hitting `defender_name`.
    ///
    /// A dual-typed defender contributes its single per-attacking-type
    /// multiplier once per type slot, i.e. the value is squared relative to
    /// a mono-typed defender. Both peers compute damage from this table, so
    /// the behavior is frozen as part of the protocol (see DESIGN.md).
    /// Unknown defenders and unmapped types are neutral (1.0).
    pub fn effectiveness(&self, defender_name: &str, attacking_type: &str) -> f64 {
        let Some(defender) = self.get(defender_name) else {
            return 1.0;
        };
        let attacking = attacking_type.to_lowercase();
        let single = defender.effectiveness.get(&attacking).copied().unwrap_or(1.0);
        if defender.type2.is_some() {
            single * single
        } else {
            single
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
