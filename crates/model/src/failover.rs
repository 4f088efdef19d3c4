use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How a stripe behaves when its active cannot reach a majority of its members.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FailoverPriority {
    /// Favour availability: a passive promotes itself even if it might split the brain.
    Availability,

    /// Favour consistency: promotion requires a majority, optionally helped by external voters.
    Consistency {
        /// Number of external voters.
        voters: u32,
    },
}

impl FailoverPriority {
    /// Number of external voters, zero for availability.
    #[must_use]
    pub const fn voters(self) -> u32 {
        match self {
            Self::Availability => 0,
            Self::Consistency { voters } => voters,
        }
    }
}

impl Display for FailoverPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Availability => f.write_str("availability"),
            Self::Consistency { voters: 0 } => f.write_str("consistency"),
            Self::Consistency { voters } => write!(f, "consistency:{voters}"),
        }
    }
}

impl FromStr for FailoverPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidValue {
            setting: "failover-priority".to_string(),
            value: s.to_string(),
            reason: "expected 'availability', 'consistency' or 'consistency:N' where N > 0"
                .to_string(),
        };

        match s {
            "availability" => Ok(Self::Availability),
            "consistency" => Ok(Self::Consistency { voters: 0 }),
            other => {
                let voters = other.strip_prefix("consistency:").ok_or_else(invalid)?;
                match voters.parse::<u32>() {
                    Ok(voters) if voters > 0 => Ok(Self::Consistency { voters }),
                    _ => Err(invalid()),
                }
            }
        }
    }
}
