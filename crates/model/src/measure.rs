//! Quantities with units as written by operators, such as `150s` or `512MB`.

use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

const TIME_UNITS: [(&str, u64); 4] = [("ms", 1), ("s", 1_000), ("m", 60_000), ("h", 3_600_000)];

const MEMORY_UNITS: [(&str, u32); 6] = [
    ("B", 0),
    ("KB", 10),
    ("MB", 20),
    ("GB", 30),
    ("TB", 40),
    ("PB", 50),
];

fn split_quantity(s: &str) -> Option<(u64, &str)> {
    let digits = s.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 {
        return None;
    }
    let quantity = s[..digits].parse().ok()?;
    Some((quantity, &s[digits..]))
}

/// A duration keeping the unit it was written with.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeMeasure {
    quantity: u64,
    unit: String,
}

impl TimeMeasure {
    /// Creates a measure in seconds.
    #[must_use]
    pub fn seconds(quantity: u64) -> Self {
        Self {
            quantity,
            unit: "s".to_string(),
        }
    }

    /// Parses a measure, accepting only the listed units.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if the quantity or unit is malformed or not allowed.
    pub fn parse_with_units(setting: &str, s: &str, allowed: &[&str]) -> Result<Self, Error> {
        let invalid = |reason: String| Error::InvalidValue {
            setting: setting.to_string(),
            value: s.to_string(),
            reason,
        };

        let (quantity, unit) =
            split_quantity(s).ok_or_else(|| invalid("expected <quantity><unit>".to_string()))?;
        if !allowed.contains(&unit) {
            return Err(invalid(format!("unit must be one of {allowed:?}")));
        }

        Ok(Self {
            quantity,
            unit: unit.to_string(),
        })
    }

    /// Converts to a [`Duration`].
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        let millis = TIME_UNITS
            .iter()
            .find(|(unit, _)| *unit == self.unit)
            .map_or(1_000, |(_, millis)| *millis);
        Duration::from_millis(self.quantity.saturating_mul(millis))
    }
}

impl Display for TimeMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.quantity, self.unit)
    }
}

impl FromStr for TimeMeasure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let units: Vec<&str> = TIME_UNITS.iter().map(|(unit, _)| *unit).collect();
        Self::parse_with_units("time", s, &units)
    }
}

/// A memory size keeping the unit it was written with.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MemorySize {
    quantity: u64,
    unit: String,
}

impl MemorySize {
    /// Creates a size in megabytes.
    #[must_use]
    pub fn megabytes(quantity: u64) -> Self {
        Self {
            quantity,
            unit: "MB".to_string(),
        }
    }

    /// Size in bytes.
    #[must_use]
    pub fn as_bytes(&self) -> u64 {
        let shift = MEMORY_UNITS
            .iter()
            .find(|(unit, _)| *unit == self.unit)
            .map_or(0, |(_, shift)| *shift);
        self.quantity.saturating_mul(1_u64 << shift)
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.quantity, self.unit)
    }
}

impl FromStr for MemorySize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidValue {
            setting: "offheap-resources".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (quantity, unit) =
            split_quantity(s).ok_or_else(|| invalid("expected <quantity><unit>"))?;
        if !MEMORY_UNITS.iter().any(|(known, _)| *known == unit) {
            return Err(invalid("unit must be one of B, KB, MB, GB, TB, PB"));
        }

        Ok(Self {
            quantity,
            unit: unit.to_string(),
        })
    }
}
