//! The three shutdown stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three fixed, strictly ordered shutdown stages.
///
/// Every entry of [`Stage::First`] has acknowledged (or timed out) before any
/// entry of [`Stage::Second`] is dispatched, and likewise for the third stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Stop accepting new work.
    First,
    /// Finish or abandon in-flight work.
    Second,
    /// Release shared resources.
    Third,
}

impl Stage {
    /// All stages in dispatch order.
    pub const ALL: [Stage; 3] = [Stage::First, Stage::Second, Stage::Third];

    /// The 1-based stage number.
    pub fn number(self) -> u8 {
        match self {
            Stage::First => 1,
            Stage::Second => 2,
            Stage::Third => 3,
        }
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.number() - 1)
    }

    /// Lowercase stage name, as used in logs and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::First => "first",
            Stage::Second => "second",
            Stage::Third => "third",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
