//! Move quality classification

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;

/// Move-quality glyph for a played move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Glyph {
    /// `??`
    Blunder,
    /// `?`
    Mistake,
    /// `?!`
    Dubious,
}

impl Glyph {
    /// Picks the glyph for a centipawn loss. A bigger loss never yields a
    /// milder glyph as long as the thresholds are ordered.
    pub fn from_cp_loss(cp_loss: i32, thresholds: &Thresholds) -> Option<Self> {
        match cp_loss {
            l if l >= thresholds.blunder => Some(Glyph::Blunder),
            l if l >= thresholds.mistake => Some(Glyph::Mistake),
            l if l >= thresholds.dubious => Some(Glyph::Dubious),
            _ => None,
        }
    }

    /// Numeric annotation glyph as written in PGN (`$n`)
    pub fn nag(self) -> u8 {
        match self {
            Glyph::Mistake => 2,
            Glyph::Blunder => 4,
            Glyph::Dubious => 6,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Glyph::Blunder => "??",
            Glyph::Mistake => "?",
            Glyph::Dubious => "?!",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Glyph::Blunder => "blunder",
            Glyph::Mistake => "mistake",
            Glyph::Dubious => "dubious",
        }
    }
}

/// Chance of winning in percent for a value on the common scale, from the
/// point of view of the side the value belongs to. Mate values saturate at
/// 0 and 100.
pub fn winning_chances(value: i32) -> f64 {
    let cp = f64::from(value);
    50.0 + 50.0 * (2.0 / (1.0 + (-0.004 * cp).exp()) - 1.0)
}

/// Whether the drop from `best` to `played` is worth a variation. Small
/// drops in decided positions are ignored.
pub fn is_notable(best: i32, played: i32, thresholds: &Thresholds) -> bool {
    winning_chances(best) - winning_chances(played) > thresholds.notable
}
